use crate::{
    OneWireCrc, OneWireError, OneWireResult, RomCode,
    consts::{ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD, ONEWIRE_SKIP_ROM_CMD},
};

/// Status reported by a bus master after a reset pulse.
pub trait OneWireStatus {
    /// Returns `true` if at least one device answered with a presence pulse.
    fn presence(&self) -> bool;
    /// Returns `true` if the bus was found shorted to ground.
    fn shortcircuit(&self) -> bool;
}

/// Trait for 1-Wire communication.
/// This trait defines the basic operations required for 1-Wire communication, such as resetting the bus,
/// writing and reading bytes, and writing and reading bits.
///
/// All methods block until the bus master has finished the requested time slots.
pub trait OneWire {
    /// The status type returned by the reset operation.
    /// This type must implement the [OneWireStatus] trait.
    type Status: OneWireStatus;
    /// The error type returned by the operations of this trait.
    /// This type is used to indicate errors in the underlying hardware or communication.
    type BusError;

    /// Resets the 1-Wire bus and returns the status of the bus.
    ///
    /// # Errors
    /// Returns [`OneWireError::NoDevicePresent`] if no presence pulse was seen,
    /// [`OneWireError::ShortCircuit`] if the line is held low, or any error of the bus master.
    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError>;

    /// Writes a byte to the 1-Wire bus, least significant bit first.
    ///
    /// # Errors
    /// This method returns an error if the write operation fails.
    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError>;

    /// Reads a byte from the 1-Wire bus, least significant bit first.
    ///
    /// # Errors
    /// This method returns an error if the read operation fails.
    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError>;

    /// Writes a single bit to the 1-Wire bus.
    ///
    /// # Errors
    /// This method returns an error if the write operation fails.
    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError>;

    /// Reads a single bit from the 1-Wire bus.
    ///
    /// # Errors
    /// This method returns an error if the read operation fails.
    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Addresses devices on the 1-Wire bus.
    /// The first [`OneWire::read_byte`], [`OneWire::read_bit`], [`OneWire::write_byte`], [`OneWire::write_bit`] operation should be preceded by this method to address devices on the bus.
    /// Note: A [`OneWire::read_byte`] or [`OneWire::read_bit`] call will return garbage data if this method is called with [`RomCode::BROADCAST`] on a bus with multiple devices.
    ///
    /// # Arguments
    /// * `rom` - The ROM code of the device to address. Pass [`RomCode::BROADCAST`] to skip ROM addressing and address all devices on the bus.
    fn address(&mut self, rom: RomCode) -> OneWireResult<(), Self::BusError> {
        self.reset()?;
        if rom.is_broadcast() {
            return self.write_byte(ONEWIRE_SKIP_ROM_CMD);
        }
        self.write_byte(ONEWIRE_MATCH_ROM_CMD)?;
        for &b in rom.to_bytes().iter() {
            self.write_byte(b)?;
        }
        Ok(())
    }

    /// Reads the ROM code of the only device on the bus.
    ///
    /// # Errors
    /// Returns [`OneWireError::InvalidCrc`] if the code read back does not pass its CRC,
    /// which is what happens when more than one device answers.
    fn read_rom(&mut self) -> OneWireResult<RomCode, Self::BusError> {
        self.reset()?;
        self.write_byte(ONEWIRE_READ_ROM_CMD)?;
        let mut rom = [0u8; 8];
        for b in rom.iter_mut() {
            *b = self.read_byte()?;
        }
        if !OneWireCrc::validate(&rom) {
            log::warn!("READ ROM returned {rom:02x?} with invalid CRC");
            return Err(OneWireError::InvalidCrc);
        }
        Ok(RomCode::from_bytes(rom))
    }
}
