#![allow(async_fn_in_trait)]
use crate::{
    OneWireCrc, OneWireError, OneWireResult, OneWireStatus, RomCode,
    consts::{ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD, ONEWIRE_SKIP_ROM_CMD},
};

/// Async counterpart of [`OneWire`](crate::OneWire).
///
/// Each method resolves once the bus master has finished the requested time slots,
/// with the same results and errors as its blocking twin.
pub trait OneWireAsync {
    /// Reset status, see [`OneWire::Status`](crate::OneWire::Status).
    type Status: OneWireStatus;
    /// Error of the underlying bus master.
    type BusError;

    /// Issues a reset pulse and samples the presence pulse.
    ///
    /// # Errors
    /// [`OneWireError::NoDevicePresent`] or [`OneWireError::ShortCircuit`], like [`OneWire::reset`](crate::OneWire::reset).
    async fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError>;

    /// Sends eight write slots, LSB first.
    async fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError>;

    /// Collects eight read slots, LSB first.
    async fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError>;

    /// Sends a single write slot.
    async fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError>;

    /// Samples a single read slot.
    async fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Resets the bus and selects `rom`, or every device for [`RomCode::BROADCAST`].
    /// See [`OneWire::address`](crate::OneWire::address).
    async fn address(&mut self, rom: RomCode) -> OneWireResult<(), Self::BusError> {
        self.reset().await?;
        if rom.is_broadcast() {
            return self.write_byte(ONEWIRE_SKIP_ROM_CMD).await;
        }
        self.write_byte(ONEWIRE_MATCH_ROM_CMD).await?;
        for b in rom.to_bytes() {
            self.write_byte(b).await?;
        }
        Ok(())
    }

    /// See [`OneWire::read_rom`](crate::OneWire::read_rom).
    async fn read_rom(&mut self) -> OneWireResult<RomCode, Self::BusError> {
        self.reset().await?;
        self.write_byte(ONEWIRE_READ_ROM_CMD).await?;
        let mut rom = [0u8; 8];
        for b in rom.iter_mut() {
            *b = self.read_byte().await?;
        }
        if !OneWireCrc::validate(&rom) {
            log::warn!("READ ROM returned {rom:02x?} with invalid CRC");
            return Err(OneWireError::InvalidCrc);
        }
        Ok(RomCode::from_bytes(rom))
    }
}
