use crate::{OneWireResult, OneWireStatus};

/// Line-state control used to feed parasite-powered devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullUp {
    /// The line idles high through the pull-up resistor only; normal communication.
    #[default]
    Weak,
    /// The line is actively driven high to deliver current during a conversion.
    Strong,
}

/// Completion of a transfer started through [`OneWireTransfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDone<S> {
    /// A reset pulse finished; carries the presence status.
    Reset(S),
    /// All eight time slots of a byte write were confirmed.
    Written,
    /// All eight time slots of a byte read were sampled.
    Read(u8),
}

/// Completion-driven access to a 1-Wire bus.
///
/// A transfer is started with one of the `start_*` methods and runs in the
/// background, one time slot per completion event of the bus master. At most one
/// transfer can be in flight: starting another before the first has completed fails
/// with [`OneWireError::Busy`](crate::OneWireError::Busy) and leaves the running
/// transfer untouched. Requests are never queued.
///
/// Completed transfers are reported by [`OneWireTransfer::poll`]; multi-step
/// sequences such as [`RomMatch`](crate::RomMatch) start their next transfer from
/// the completion of the previous one.
pub trait OneWireTransfer {
    /// The status type carried by [`TransferDone::Reset`].
    type Status: OneWireStatus;
    /// The error type of the underlying bus master.
    type BusError;

    /// Starts a reset pulse and presence detection.
    fn start_reset(&mut self) -> OneWireResult<(), Self::BusError>;

    /// Starts writing a byte, least significant bit first.
    fn start_write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError>;

    /// Starts reading a byte, least significant bit first.
    fn start_read_byte(&mut self) -> OneWireResult<(), Self::BusError>;

    /// Advances the running transfer if a time slot has completed.
    ///
    /// Returns `Some` exactly once per transfer, when its last time slot lands.
    fn poll(&mut self) -> OneWireResult<Option<TransferDone<Self::Status>>, Self::BusError>;

    /// Returns `true` if no transfer is in flight.
    fn is_idle(&self) -> bool;

    /// Switches the line between weak and strong pull-up.
    fn set_pull_up(&mut self, pull: PullUp) -> OneWireResult<(), Self::BusError>;
}
