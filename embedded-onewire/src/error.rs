/// One wire communication error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneWireError<E> {
    /// Encapsulates the error type from the underlying hardware.
    Other(E),
    /// Indicates that no device answered the reset pulse with a presence pulse.
    NoDevicePresent,
    /// Indicates that a transfer is already in flight on the bus.
    /// The request was not queued and has to be retried once the bus is idle.
    Busy,
    /// Indicates that a short circuit was detected on the bus.
    ShortCircuit,
    /// Indicates that the operation is not implemented by the bus master.
    Unimplemented,
    /// Computed CRC of a ROM code or scratchpad is invalid.
    InvalidCrc,
}

impl<E> From<E> for OneWireError<E> {
    fn from(other: E) -> Self {
        Self::Other(other)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for OneWireError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OneWireError::Other(e) => write!(f, "bus error: {e:?}"),
            OneWireError::NoDevicePresent => f.write_str("no device present"),
            OneWireError::Busy => f.write_str("bus busy"),
            OneWireError::ShortCircuit => f.write_str("short circuit on bus"),
            OneWireError::Unimplemented => f.write_str("operation not implemented"),
            OneWireError::InvalidCrc => f.write_str("CRC mismatch"),
        }
    }
}
