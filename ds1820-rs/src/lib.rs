#![no_std]
//! Driver for DS1820 family temperature sensors.
//!
//! [`Ds1820Group`] enumerates the sensors on a bus, runs conversions and scratchpad
//! reads one transfer at a time over a [`OneWireTransfer`] bus, and keeps the last
//! good temperature of every sensor. A few blocking helpers work over any [`OneWire`] bus.

#[cfg(test)]
extern crate std;

use core::iter::zip;
use embedded_hal::delay::DelayNs;
use embedded_onewire::{
    OneWire, OneWireCrc, OneWireError, OneWireResult, OneWireSearch, OneWireSearchKind,
    OneWireTransfer, RomCode, TransferDone,
};

mod reader;
mod temperature;

pub use reader::{Ds1820Reader, ReaderEvent};
pub use temperature::{JUMP_THRESHOLD_TENTHS, TemperatureFilter, TemperatureReading, decode_scratchpad};

/// Family code of the DS1820 / DS18S20.
pub const DS1820_FAMILY: u8 = 0x10;
/// Length of the scratchpad including its CRC byte.
pub const SCRATCHPAD_LEN: usize = 9;
/// Time a conversion needs before the scratchpad can be read.
pub const CONVERSION_TIME_MS: u32 = 750;

pub const CONVERT_T: u8 = 0x44;
pub const READ_SCRATCHPAD: u8 = 0xbe;
pub const WRITE_SCRATCHPAD: u8 = 0x4e;
pub const COPY_SCRATCHPAD: u8 = 0x48;
pub const RECALL_E2: u8 = 0xb8;
pub const READ_POWER_SUPPLY: u8 = 0xb4;

/// How a sensor is powered, as answered to [`READ_POWER_SUPPLY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSupply {
    External,
    /// Needs the strong pull-up during conversions and EEPROM writes.
    Parasite,
}

/// What a completed transfer led to, at group level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEvent {
    /// The next transfer of the sequence is running.
    Pending,
    /// The convert command went out; read back after [`CONVERSION_TIME_MS`].
    ConversionStarted(RomCode),
    /// A scratchpad read finished and went through the device's [`TemperatureFilter`].
    Temperature(RomCode, TemperatureReading),
}

/// Up to `N` sensors on one bus.
#[derive(Debug)]
pub struct Ds1820Group<const N: usize> {
    devices: usize,
    roms: [RomCode; N],
    filters: [TemperatureFilter; N],
    results: [Option<TemperatureReading>; N],
    reader: Ds1820Reader,
}

impl<const N: usize> Default for Ds1820Group<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Ds1820Group<N> {
    pub fn new() -> Self {
        Self {
            devices: 0,
            roms: [RomCode::BROADCAST; N],
            filters: [TemperatureFilter::new(); N],
            results: [None; N],
            reader: Ds1820Reader::new(),
        }
    }

    /// Enumerates the devices on the bus, up to `N`.
    ///
    /// # Arguments
    /// * `family` - Only devices of this family are kept; `0` keeps every device.
    ///
    /// # Returns
    /// The number of devices found. Earlier results are forgotten.
    pub fn search_devices<O: OneWire>(&mut self, bus: &mut O, family: u8) -> OneWireResult<usize, O::BusError> {
        self.devices = 0;
        self.results = [None; N];
        self.filters = [TemperatureFilter::new(); N];
        let mut search = if family == 0 {
            OneWireSearch::new(bus, OneWireSearchKind::Normal)
        } else {
            OneWireSearch::with_family(bus, OneWireSearchKind::Normal, family)
        };
        while self.devices < N {
            let Some(rom) = search.next()? else {
                break;
            };
            log::info!("Found {rom}");
            self.roms[self.devices] = rom;
            self.devices += 1;
        }
        if self.devices == N && !search.state().is_exhausted() {
            log::warn!("More than {N} devices on the bus, ignoring the rest");
        }
        Ok(self.devices)
    }

    pub fn devices(&self) -> &[RomCode] {
        &self.roms[..self.devices]
    }

    fn index(&self, rom: RomCode) -> Option<usize> {
        self.devices().iter().position(|&r| r == rom)
    }

    pub fn is_idle(&self) -> bool {
        self.reader.is_idle()
    }

    /// Starts a conversion on `rom`, or on every device for [`RomCode::BROADCAST`].
    pub fn start_conversion<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        rom: RomCode,
    ) -> OneWireResult<(), T::BusError> {
        self.reader.start_conversion(bus, rom)
    }

    /// Starts reading the temperature of `rom`.
    pub fn start_temperature_read<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        rom: RomCode,
    ) -> OneWireResult<(), T::BusError> {
        if self.index(rom).is_none() {
            log::warn!("Reading {rom}, which was not found by the last search");
        }
        self.reader.start_temperature_read(bus, rom)
    }

    /// Advances the running sequence with the completion of its last transfer.
    ///
    /// Scratchpads are decoded and gated on their CRC; devices not found by the last
    /// search are decoded but not remembered.
    pub fn on_transfer_complete<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        done: TransferDone<T::Status>,
    ) -> OneWireResult<GroupEvent, T::BusError> {
        Ok(match self.reader.on_transfer_complete(bus, done)? {
            ReaderEvent::Pending => GroupEvent::Pending,
            ReaderEvent::ConversionStarted(rom) => GroupEvent::ConversionStarted(rom),
            ReaderEvent::Scratchpad { rom, data, crc_ok } => {
                GroupEvent::Temperature(rom, self.store(rom, &data, crc_ok))
            }
        })
    }

    fn store(&mut self, rom: RomCode, data: &[u8; SCRATCHPAD_LEN], crc_ok: bool) -> TemperatureReading {
        let tenths = decode_scratchpad(data);
        match self.index(rom) {
            Some(i) => {
                let reading = self.filters[i].accept(tenths, crc_ok);
                self.results[i] = Some(reading);
                reading
            }
            None => TemperatureFilter::new().accept(tenths, crc_ok),
        }
    }

    /// Drops the running sequence; the bus transfer must be aborted separately.
    pub fn abort(&mut self) {
        self.reader.abort();
    }

    /// Latest temperature of `rom`; `None` before its first read.
    pub fn temperature_result(&self, rom: RomCode) -> Option<TemperatureReading> {
        self.index(rom).and_then(|i| self.results[i])
    }

    /// Converts on every device and waits [`CONVERSION_TIME_MS`].
    pub fn convert_all<O: OneWire, D: DelayNs>(&self, bus: &mut O, delay: &mut D) -> OneWireResult<(), O::BusError> {
        bus.address(RomCode::BROADCAST)?;
        bus.write_byte(CONVERT_T)?;
        delay.delay_ms(CONVERSION_TIME_MS);
        Ok(())
    }

    /// Reads every known device in turn, blocking.
    pub fn read_temperatures<O: OneWire>(
        &mut self,
        bus: &mut O,
    ) -> OneWireResult<&[Option<TemperatureReading>], O::BusError> {
        for (rom, (filter, result)) in zip(
            self.roms[..self.devices].iter(),
            zip(self.filters.iter_mut(), self.results.iter_mut()),
        ) {
            let data = read_raw_scratchpad(bus, *rom)?;
            *result = Some(filter.accept(decode_scratchpad(&data), OneWireCrc::validate(&data)));
        }
        Ok(&self.results[..self.devices])
    }
}

fn read_raw_scratchpad<O: OneWire>(bus: &mut O, rom: RomCode) -> OneWireResult<[u8; SCRATCHPAD_LEN], O::BusError> {
    bus.address(rom)?;
    bus.write_byte(READ_SCRATCHPAD)?;
    let mut data = [0; SCRATCHPAD_LEN];
    for b in data.iter_mut() {
        *b = bus.read_byte()?;
    }
    Ok(data)
}

/// Reads the scratchpad of `rom`.
///
/// # Errors
/// [`OneWireError::InvalidCrc`] if the CRC byte does not match.
pub fn read_scratchpad<O: OneWire>(bus: &mut O, rom: RomCode) -> OneWireResult<[u8; SCRATCHPAD_LEN], O::BusError> {
    let data = read_raw_scratchpad(bus, rom)?;
    if !OneWireCrc::validate(&data) {
        log::warn!("Scratchpad of {rom} has an invalid CRC: {data:02x?}");
        return Err(OneWireError::InvalidCrc);
    }
    Ok(data)
}

/// Asks `rom` how it is powered.
pub fn read_power_supply<O: OneWire>(bus: &mut O, rom: RomCode) -> OneWireResult<PowerSupply, O::BusError> {
    bus.address(rom)?;
    bus.write_byte(READ_POWER_SUPPLY)?;
    // parasite-powered devices pull the read slot low
    Ok(if bus.read_bit()? {
        PowerSupply::External
    } else {
        PowerSupply::Parasite
    })
}

/// Writes the alarm thresholds TH and TL, in whole degrees, to the scratchpad of `rom`.
///
/// With `persist` they are copied to EEPROM as well.
pub fn write_alarms<O: OneWire>(
    bus: &mut O,
    rom: RomCode,
    th: i8,
    tl: i8,
    persist: bool,
) -> OneWireResult<(), O::BusError> {
    bus.address(rom)?;
    bus.write_byte(WRITE_SCRATCHPAD)?;
    bus.write_byte(th as u8)?;
    bus.write_byte(tl as u8)?;
    if persist {
        bus.address(rom)?;
        bus.write_byte(COPY_SCRATCHPAD)?;
    }
    Ok(())
}

/// Reloads the alarm thresholds of `rom` from EEPROM into its scratchpad.
pub fn recall_alarms<O: OneWire>(bus: &mut O, rom: RomCode) -> OneWireResult<(), O::BusError> {
    bus.address(rom)?;
    bus.write_byte(RECALL_E2)
}
