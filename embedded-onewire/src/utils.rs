#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Calculate CRC-8 used in 1-Wire communications.
pub struct OneWireCrc(u8);

/// Reflected form of the x^8 + x^5 + x^4 + 1 polynomial.
const POLY: u8 = 0x8c;

#[cfg(feature = "crc-table")]
static CRC_TABLE: [u8; 256] = build_table();

#[cfg(feature = "crc-table")]
const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = shift_byte(i as u8);
        i += 1;
    }
    table
}

const fn shift_byte(mut crc: u8) -> u8 {
    let mut bit = 0;
    while bit < 8 {
        if crc & 0x1 == 0x1 {
            crc = (crc >> 1) ^ POLY;
        } else {
            crc >>= 1;
        }
        bit += 1;
    }
    crc
}

impl OneWireCrc {
    /// A CRC register cleared to zero.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    #[cfg(feature = "crc-table")]
    pub fn update(&mut self, byte: u8) {
        self.0 = CRC_TABLE[(self.0 ^ byte) as usize];
    }

    /// Update the CRC with the incoming byte.
    #[cfg(not(feature = "crc-table"))]
    pub fn update(&mut self, byte: u8) {
        self.0 = shift_byte(self.0 ^ byte);
    }

    /// Compute the CRC of a sequence of bytes.
    pub fn compute(sequence: &[u8]) -> u8 {
        let mut crc = OneWireCrc(0);
        for &byte in sequence.iter() {
            crc.update(byte);
        }
        crc.0
    }

    /// Validate a sequence of bytes where the last byte is the 1-Wire CRC of
    /// the previous bytes.
    pub fn validate(sequence: &[u8]) -> bool {
        // Folding the CRC byte itself into the register clears it.
        Self::compute(sequence) == 0x0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn known_rom_code() {
        // DS18B20 ROM from the Maxim application note on CRC8
        let rom = [0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00, 0xa2];
        assert_eq!(OneWireCrc::compute(&rom[..7]), 0xa2);
        assert!(OneWireCrc::validate(&rom));
    }

    #[test]
    fn appended_crc_validates() {
        let mut rng = rand::rng();
        for _ in 0..256 {
            let mut seq = [0u8; 8];
            rng.fill(&mut seq[..7]);
            seq[7] = OneWireCrc::compute(&seq[..7]);
            assert!(OneWireCrc::validate(&seq));
            seq[rng.random_range(0..7)] ^= 1 << rng.random_range(0..8);
            assert!(!OneWireCrc::validate(&seq));
        }
    }

    #[test]
    fn table_matches_bitwise() {
        for byte in 0..=255u8 {
            let mut crc = OneWireCrc::default();
            crc.update(byte);
            assert_eq!(crc.value(), shift_byte(byte));
        }
    }

    #[test]
    fn empty_sequence_is_zero() {
        assert_eq!(OneWireCrc::compute(&[]), 0);
    }
}
