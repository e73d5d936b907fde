use bitfield_struct::bitfield;

use crate::OneWireCrc;

/// A 64-bit ROM code of a 1-Wire device.
///
/// These are globally unique, and used to single out a single device on
/// a potentially crowded bus. The byte order of [`RomCode::to_bytes`] is the
/// order in which the code travels on the wire.
///
/// | Bit | Description |
/// |-----|-------------|
/// | 0-7 | Family code (e.g., 0x10 for DS1820, 0x28 for DS18B20) |
/// | 8-55 | Serial number |
/// | 56-63 | CRC-8 (`0b1_0001_1001` poly) of bits 0-55 |
#[bitfield(u64, debug = false)]
#[derive(PartialEq, Eq, Hash)]
pub struct RomCode {
    /// Family code of the device.
    pub family: u8,
    /// Serial number of the device.
    #[bits(48)]
    pub serial: u64,
    /// CRC-8 of the family code and serial number.
    pub crc: u8,
}

impl RomCode {
    /// Sentinel addressing every device on the bus with SKIP ROM instead of MATCH ROM.
    pub const BROADCAST: RomCode = RomCode::new();

    /// Creates a ROM code from its on-wire byte order.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self::from_bits(u64::from_le_bytes(bytes))
    }

    /// Returns the ROM code in on-wire byte order.
    pub const fn to_bytes(self) -> [u8; 8] {
        self.into_bits().to_le_bytes()
    }

    /// Creates a ROM code from a family code and serial number, filling in the CRC.
    pub fn with_computed_crc(family: u8, serial: u64) -> Self {
        let rom = RomCode::new().with_family(family).with_serial(serial);
        let crc = OneWireCrc::compute(&rom.to_bytes()[..7]);
        rom.with_crc(crc)
    }

    /// Checks that the CRC byte matches the first seven bytes.
    pub fn is_valid(self) -> bool {
        OneWireCrc::validate(&self.to_bytes())
    }

    /// Checks if this is the [`RomCode::BROADCAST`] sentinel.
    pub const fn is_broadcast(self) -> bool {
        self.into_bits() == 0
    }
}

impl core::fmt::Debug for RomCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RomCode({:016X})", self.into_bits())
    }
}

impl core::fmt::Display for RomCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:016X}", self.into_bits())
    }
}
