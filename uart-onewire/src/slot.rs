//! Time slots encoded as UART frames.
//!
//! With TX and RX joined on an open-drain line every transmitted byte is echoed
//! back. At 115200 baud one frame (start bit, 8 data bits, stop bit) lasts about
//! 87 µs, which fits a 1-Wire time slot: the start bit is the master's low pulse,
//! and a device answering 0 keeps the line low while the data bits are sampled.
//! At 9600 baud the low half of `0xF0` lasts about 520 µs, long enough for a
//! reset pulse, and presence pulses corrupt the high nibble of the echo.
use bitfield_struct::bitfield;
use embedded_hal::delay::DelayNs;
use embedded_onewire::{OneWireStatus, PullUp};

/// Frame sent for a write-1 or read slot.
pub const SLOT_ONE: u8 = 0xff;
/// Frame sent for a write-0 slot.
pub const SLOT_ZERO: u8 = 0x00;
/// Frame sent for a reset pulse at [`BaudRate::Reset`].
pub const RESET_PATTERN: u8 = 0xf0;

/// Baud rates used to shape the line.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    /// Reset pulse and presence detection.
    Reset = 9600,
    /// Read and write time slots.
    Data = 115_200,
}

impl BaudRate {
    /// Baud rate in bits per second.
    pub const fn bps(self) -> u32 {
        self as u32
    }
}

/// Half-duplex UART wired as a 1-Wire line.
///
/// Every call must return promptly: [`SlotLine::receive`] reports an echo that
/// has not arrived yet as [`nb::Error::WouldBlock`]. On a microcontroller this is
/// the receive-data-available flag; [`TransferEngine::on_slot_complete`](crate::TransferEngine::on_slot_complete)
/// can equally be called from the receive interrupt itself.
pub trait SlotLine {
    /// Error type of the serial peripheral.
    type Error;

    /// Switches the line to the given baud rate.
    fn set_baud_rate(&mut self, baud: BaudRate) -> Result<(), Self::Error>;

    /// Drops any received byte that was not consumed yet.
    fn discard_received(&mut self) -> Result<(), Self::Error>;

    /// Starts transmitting one frame.
    fn transmit(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Returns the echo of the last frame once it has been received.
    fn receive(&mut self) -> nb::Result<u8, Self::Error>;

    /// Switches between the pull-up resistor and an active high drive of the line.
    fn set_pull_up(&mut self, pull: PullUp) -> Result<(), Self::Error>;
}

/// Frame encoding a time slot that writes `bit`.
pub const fn encode_bit(bit: bool) -> u8 {
    if bit { SLOT_ONE } else { SLOT_ZERO }
}

/// Bit sampled during a slot, given its echo.
///
/// Anything but an untouched [`SLOT_ONE`] means a device held the line low.
pub const fn decode_echo(echo: u8) -> bool {
    echo == SLOT_ONE
}

/// Outcome of a reset pulse.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct ResetStatus {
    /// Echo of the reset frame.
    pub echo: u8,
    /// At least one device answered with a presence pulse.
    pub presence: bool,
    /// The line was held low for the whole frame.
    pub short_detect: bool,
    #[bits(6)]
    __: u8,
}

impl ResetStatus {
    /// Interprets the echo of [`RESET_PATTERN`].
    ///
    /// An untouched echo means nobody answered; an all-zero echo means the line never
    /// came back up.
    pub const fn from_echo(echo: u8) -> Self {
        Self::new()
            .with_echo(echo)
            .with_presence(echo != RESET_PATTERN && echo != 0)
            .with_short_detect(echo == 0)
    }
}

impl OneWireStatus for ResetStatus {
    fn presence(&self) -> bool {
        ResetStatus::presence(self)
    }

    fn shortcircuit(&self) -> bool {
        self.short_detect()
    }
}

/// Time budget for waiting on an echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTiming {
    /// Longest wait for an echo, in microseconds.
    pub timeout_us: u32,
    /// Delay between two checks of the line, in microseconds.
    pub poll_us: u32,
}

impl Default for SlotTiming {
    fn default() -> Self {
        Self {
            timeout_us: 10_000,
            poll_us: 10,
        }
    }
}

impl SlotTiming {
    /// Number of checks of the line before the budget runs out.
    pub const fn attempts(&self) -> u32 {
        let poll = if self.poll_us == 0 { 1 } else { self.poll_us };
        self.timeout_us / poll + 1
    }
}

/// Runs one time slot synchronously and returns the sampled bit.
///
/// Returns `Ok(None)` if no echo arrived within `timing`.
///
/// # Errors
/// Any error of the line.
pub fn send_slot<L: SlotLine, D: DelayNs>(
    line: &mut L,
    delay: &mut D,
    timing: SlotTiming,
    bit: bool,
) -> Result<Option<bool>, L::Error> {
    line.discard_received()?;
    line.transmit(encode_bit(bit))?;
    for _ in 0..timing.attempts() {
        match line.receive() {
            Ok(echo) => return Ok(Some(decode_echo(echo))),
            Err(nb::Error::WouldBlock) => delay.delay_us(timing.poll_us),
            Err(nb::Error::Other(e)) => return Err(e),
        }
    }
    Ok(None)
}
