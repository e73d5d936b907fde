use fixed::types::I16F16;

use crate::SCRATCHPAD_LEN;

/// Largest change between two good readings, in tenths of a degree, that is not reported.
pub const JUMP_THRESHOLD_TENTHS: i16 = 50;

/// Decodes the temperature register of a scratchpad into tenths of a degree Celsius.
///
/// Bits 4..11 of the register hold the integer part with bit 11 as the sign; the
/// low nibble holds sixteenths of a degree, added truncated to tenths.
pub fn decode_scratchpad(data: &[u8; SCRATCHPAD_LEN]) -> i16 {
    let (lsb, msb) = (data[0], data[1]);
    let mut int = i16::from(((lsb >> 4) | (msb << 4)) & 0x7f);
    if msb & 0x08 != 0 {
        int = -((!int) & 0x7f);
    }
    let mut tenths = int * 10;
    let frac = lsb & 0x0f;
    if frac != 0 {
        tenths += i16::from(frac) * 10 / 16;
    }
    tenths
}

/// A temperature as reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemperatureReading {
    /// Tenths of a degree Celsius.
    pub tenths: i16,
    /// `false` if the scratchpad failed its CRC and `tenths` is the last good value.
    pub valid: bool,
}

impl TemperatureReading {
    /// Temperature in degrees Celsius.
    pub fn celsius(&self) -> I16F16 {
        I16F16::from_num(self.tenths) / I16F16::from_num(10)
    }
}

impl core::fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.tenths < 0 { "-" } else { "" };
        let abs = self.tenths.unsigned_abs();
        write!(f, "{sign}{}.{} C", abs / 10, abs % 10)?;
        if !self.valid {
            write!(f, " (stale)")?;
        }
        Ok(())
    }
}

/// Gates decoded temperatures on their CRC and keeps the last good one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemperatureFilter {
    last_good: Option<i16>,
}

impl TemperatureFilter {
    pub const fn new() -> Self {
        Self { last_good: None }
    }

    /// Last value that passed its CRC.
    pub fn last_good(&self) -> Option<i16> {
        self.last_good
    }

    /// Takes a freshly decoded temperature.
    ///
    /// A value whose scratchpad failed the CRC is dropped and the last good value is
    /// returned instead (zero before the first good one). A good value always becomes
    /// the new last good value; a change of more than 5.0 °C is only logged.
    pub fn accept(&mut self, tenths: i16, crc_ok: bool) -> TemperatureReading {
        if !crc_ok {
            log::warn!("Scratchpad CRC mismatch, discarding {tenths}, keeping {:?}", self.last_good);
            return TemperatureReading {
                tenths: self.last_good.unwrap_or(0),
                valid: false,
            };
        }
        if let Some(prev) = self.last_good {
            if (i32::from(tenths) - i32::from(prev)).abs() > i32::from(JUMP_THRESHOLD_TENTHS) {
                log::warn!("Temperature jumped from {prev} to {tenths} tenths");
            }
        }
        self.last_good = Some(tenths);
        TemperatureReading { tenths, valid: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(lsb: u8, msb: u8) -> [u8; SCRATCHPAD_LEN] {
        let mut data = [0; SCRATCHPAD_LEN];
        data[0] = lsb;
        data[1] = msb;
        data
    }

    #[test]
    fn decode_power_on_value() {
        assert_eq!(decode_scratchpad(&pad(0x50, 0x05)), 850);
    }

    #[test]
    fn decode_negative() {
        assert_eq!(decode_scratchpad(&pad(0x91, 0xff)), -60);
        assert!(decode_scratchpad(&pad(0x00, 0xff)) < 0);
    }

    #[test]
    fn decode_fraction_truncates() {
        // 25 + 8/16
        assert_eq!(decode_scratchpad(&pad(0x98, 0x01)), 255);
        // 25 + 15/16
        assert_eq!(decode_scratchpad(&pad(0x9f, 0x01)), 259);
        assert_eq!(decode_scratchpad(&pad(0x00, 0x00)), 0);
    }

    #[test]
    fn crc_failure_keeps_previous() {
        let mut filter = TemperatureFilter::new();
        assert_eq!(filter.accept(215, false), TemperatureReading { tenths: 0, valid: false });
        assert_eq!(filter.last_good(), None);
        assert_eq!(filter.accept(215, true), TemperatureReading { tenths: 215, valid: true });
        assert_eq!(filter.accept(-400, false), TemperatureReading { tenths: 215, valid: false });
        assert_eq!(filter.last_good(), Some(215));
    }

    #[test]
    fn jump_is_accepted() {
        let mut filter = TemperatureFilter::new();
        filter.accept(200, true);
        let reading = filter.accept(851, true);
        assert!(reading.valid);
        assert_eq!(filter.last_good(), Some(851));
        assert_eq!(filter.accept(800, true).tenths, 800);
    }

    #[test]
    fn celsius_and_display() {
        let reading = TemperatureReading { tenths: -65, valid: true };
        assert_eq!(reading.celsius(), I16F16::from_num(-6.5));
        assert_eq!(std::format!("{reading}"), "-6.5 C");
        let stale = TemperatureReading { tenths: 850, valid: false };
        assert_eq!(std::format!("{stale}"), "85.0 C (stale)");
    }
}
