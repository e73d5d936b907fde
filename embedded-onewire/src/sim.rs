//! A bit-level model of a 1-Wire bus and of temperature sensors hanging on it.
//!
//! Every device follows the master's time slots: it listens for ROM and function
//! commands, drives its ROM bits during a search and pulls the line low to send
//! zeros. The line is a wired-AND of the master and all devices.
//!
//! [`SimBus`] is a bus master over a [`Wire`] that completes every transfer
//! immediately, and implements [`OneWire`], [`OneWireAsync`] and [`OneWireTransfer`].
//! Bus masters with their own slot encoding can drive a [`Wire`] directly.
use core::convert::Infallible;
use std::vec::Vec;

use crate::{
    OneWire, OneWireAsync, OneWireCrc, OneWireError, OneWireResult, OneWireStatus, OneWireTransfer,
    PullUp, RomCode, TransferDone,
    consts::{
        ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD, ONEWIRE_SEARCH_CMD,
        ONEWIRE_SKIP_ROM_CMD,
    },
};

const CONVERT_T: u8 = 0x44;
const READ_SCRATCHPAD: u8 = 0xbe;
const WRITE_SCRATCHPAD: u8 = 0x4e;
const COPY_SCRATCHPAD: u8 = 0x48;
const RECALL_E2: u8 = 0xb8;
const READ_POWER_SUPPLY: u8 = 0xb4;

/// Power-on scratchpad: 85.0 °C, TH 75, TL 70.
const POWER_ON_SCRATCHPAD: [u8; 8] = [0x50, 0x05, 0x4b, 0x46, 0xff, 0xff, 0x0c, 0x10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Not addressed; ignores the line until the next reset
    Asleep,
    RomCommand { acc: u8, bits: u8 },
    /// `phase` 0 drives the ROM bit, 1 its complement, 2 reads the direction
    Search { bit: u8, phase: u8 },
    Match { bit: u8 },
    Function { acc: u8, bits: u8 },
    Send { buf: [u8; 9], len: u8, bit: u8 },
    Receive { buf: [u8; 2], bit: u8 },
    PowerQuery,
}

/// A simulated temperature sensor.
#[derive(Debug, Clone)]
pub struct SimDevice {
    rom: RomCode,
    alarmed: bool,
    parasite: bool,
    crc_fault: bool,
    temperature: [u8; 2],
    scratchpad: [u8; 9],
    eeprom: [u8; 2],
    conversions: u32,
    mode: Mode,
}

impl SimDevice {
    /// Creates a device with the given ROM code and the power-on scratchpad.
    pub fn new(rom: RomCode) -> Self {
        let mut scratchpad = [0; 9];
        scratchpad[..8].copy_from_slice(&POWER_ON_SCRATCHPAD);
        scratchpad[8] = OneWireCrc::compute(&scratchpad[..8]);
        Self {
            rom,
            alarmed: false,
            parasite: false,
            crc_fault: false,
            temperature: [POWER_ON_SCRATCHPAD[0], POWER_ON_SCRATCHPAD[1]],
            scratchpad,
            eeprom: [POWER_ON_SCRATCHPAD[2], POWER_ON_SCRATCHPAD[3]],
            conversions: 0,
            mode: Mode::Asleep,
        }
    }

    /// The device answers the conditional (alarm) search.
    pub fn alarmed(mut self) -> Self {
        self.alarmed = true;
        self
    }

    /// The device draws its power from the data line.
    pub fn parasite(mut self) -> Self {
        self.parasite = true;
        self
    }

    /// Sets the raw temperature register latched by the next conversion.
    pub fn with_temperature(mut self, raw: [u8; 2]) -> Self {
        self.temperature = raw;
        self
    }

    /// Sets the raw temperature register latched by the next conversion.
    pub fn set_temperature(&mut self, raw: [u8; 2]) {
        self.temperature = raw;
    }

    /// Conversions store a wrong CRC byte in the scratchpad while set.
    pub fn set_crc_fault(&mut self, fault: bool) {
        self.crc_fault = fault;
    }

    /// ROM code of the device.
    pub fn rom(&self) -> RomCode {
        self.rom
    }

    /// Current scratchpad contents.
    pub fn scratchpad(&self) -> &[u8; 9] {
        &self.scratchpad
    }

    /// Alarm thresholds (TH, TL) stored in EEPROM.
    pub fn eeprom(&self) -> [u8; 2] {
        self.eeprom
    }

    /// Number of temperature conversions performed.
    pub fn conversions(&self) -> u32 {
        self.conversions
    }

    /// Returns `true` if the device was addressed and waits for a function command.
    pub fn is_selected(&self) -> bool {
        matches!(self.mode, Mode::Function { bits: 0, .. })
    }

    fn reset(&mut self) {
        self.mode = Mode::RomCommand { acc: 0, bits: 0 };
    }

    fn rom_bit(&self, bit: u8) -> bool {
        (self.rom.into_bits() >> bit) & 1 == 1
    }

    /// Level the device puts on the line during the next slot; `false` pulls it low.
    fn drive(&self) -> bool {
        match self.mode {
            Mode::Search { bit, phase: 0 } => self.rom_bit(bit),
            Mode::Search { bit, phase: 1 } => !self.rom_bit(bit),
            Mode::Send { buf, bit, .. } => (buf[usize::from(bit / 8)] >> (bit % 8)) & 1 == 1,
            Mode::PowerQuery => !self.parasite,
            _ => true,
        }
    }

    /// Samples the line at the end of a slot.
    fn latch(&mut self, line: bool) {
        self.mode = match self.mode {
            Mode::Asleep | Mode::PowerQuery => self.mode,
            Mode::RomCommand { acc, bits } => {
                let acc = acc | (u8::from(line) << bits);
                if bits < 7 {
                    Mode::RomCommand { acc, bits: bits + 1 }
                } else {
                    self.rom_command(acc)
                }
            }
            Mode::Search { bit, phase } if phase < 2 => Mode::Search { bit, phase: phase + 1 },
            Mode::Search { bit, .. } | Mode::Match { bit } if line != self.rom_bit(bit) => Mode::Asleep,
            Mode::Search { bit: 63, .. } | Mode::Match { bit: 63 } => Mode::Function { acc: 0, bits: 0 },
            Mode::Search { bit, .. } => Mode::Search { bit: bit + 1, phase: 0 },
            Mode::Match { bit } => Mode::Match { bit: bit + 1 },
            Mode::Function { acc, bits } => {
                let acc = acc | (u8::from(line) << bits);
                if bits < 7 {
                    Mode::Function { acc, bits: bits + 1 }
                } else {
                    self.function_command(acc)
                }
            }
            Mode::Send { buf, len, bit } => {
                if bit + 1 < len * 8 {
                    Mode::Send { buf, len, bit: bit + 1 }
                } else {
                    Mode::Asleep
                }
            }
            Mode::Receive { mut buf, bit } => {
                buf[usize::from(bit / 8)] |= u8::from(line) << (bit % 8);
                if bit < 15 {
                    Mode::Receive { buf, bit: bit + 1 }
                } else {
                    self.scratchpad[2..4].copy_from_slice(&buf);
                    self.scratchpad[8] = OneWireCrc::compute(&self.scratchpad[..8]);
                    Mode::Asleep
                }
            }
        };
    }

    fn rom_command(&self, cmd: u8) -> Mode {
        match cmd {
            ONEWIRE_SEARCH_CMD => Mode::Search { bit: 0, phase: 0 },
            ONEWIRE_CONDITIONAL_SEARCH_CMD if self.alarmed => Mode::Search { bit: 0, phase: 0 },
            ONEWIRE_MATCH_ROM_CMD => Mode::Match { bit: 0 },
            ONEWIRE_SKIP_ROM_CMD => Mode::Function { acc: 0, bits: 0 },
            ONEWIRE_READ_ROM_CMD => {
                let mut buf = [0; 9];
                buf[..8].copy_from_slice(&self.rom.to_bytes());
                Mode::Send { buf, len: 8, bit: 0 }
            }
            _ => Mode::Asleep,
        }
    }

    fn function_command(&mut self, cmd: u8) -> Mode {
        match cmd {
            CONVERT_T => {
                self.conversions += 1;
                self.scratchpad[..2].copy_from_slice(&self.temperature);
                self.scratchpad[8] = OneWireCrc::compute(&self.scratchpad[..8]);
                if self.crc_fault {
                    self.scratchpad[8] ^= 0x5a;
                }
                Mode::Asleep
            }
            READ_SCRATCHPAD => Mode::Send {
                buf: self.scratchpad,
                len: 9,
                bit: 0,
            },
            WRITE_SCRATCHPAD => Mode::Receive { buf: [0; 2], bit: 0 },
            COPY_SCRATCHPAD => {
                self.eeprom.copy_from_slice(&self.scratchpad[2..4]);
                Mode::Asleep
            }
            RECALL_E2 => {
                self.scratchpad[2..4].copy_from_slice(&self.eeprom);
                self.scratchpad[8] = OneWireCrc::compute(&self.scratchpad[..8]);
                Mode::Asleep
            }
            READ_POWER_SUPPLY => Mode::PowerQuery,
            _ => Mode::Asleep,
        }
    }
}

/// Reset status of the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimStatus {
    presence: bool,
    shortcircuit: bool,
}

impl OneWireStatus for SimStatus {
    fn presence(&self) -> bool {
        self.presence
    }

    fn shortcircuit(&self) -> bool {
        self.shortcircuit
    }
}

/// The shared data line.
#[derive(Debug, Clone, Default)]
pub struct Wire {
    devices: Vec<SimDevice>,
    shorted: bool,
}

impl Wire {
    /// Creates a line with the given devices attached.
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            devices,
            shorted: false,
        }
    }

    /// Attached devices.
    pub fn devices(&self) -> &[SimDevice] {
        &self.devices
    }

    /// Attached devices, mutably.
    pub fn devices_mut(&mut self) -> &mut [SimDevice] {
        &mut self.devices
    }

    /// Holds the line low.
    pub fn set_shorted(&mut self, shorted: bool) {
        self.shorted = shorted;
    }

    /// Issues a reset pulse; every device answers with a presence pulse.
    pub fn reset_pulse(&mut self) -> SimStatus {
        if self.shorted {
            return SimStatus {
                presence: false,
                shortcircuit: true,
            };
        }
        self.devices.iter_mut().for_each(SimDevice::reset);
        SimStatus {
            presence: !self.devices.is_empty(),
            shortcircuit: false,
        }
    }

    /// Runs one time slot. The master releases the line for `true` and pulls it
    /// low for `false`; returns the sampled level.
    pub fn slot(&mut self, master: bool) -> bool {
        if self.shorted {
            return false;
        }
        let line = master && self.devices.iter().all(SimDevice::drive);
        for dev in self.devices.iter_mut() {
            dev.latch(line);
        }
        line
    }
}

/// Bus master over a [`Wire`] whose transfers complete immediately.
#[derive(Debug, Clone, Default)]
pub struct SimBus {
    wire: Wire,
    written: Vec<u8>,
    pull_ups: Vec<PullUp>,
    pending: Option<TransferDone<SimStatus>>,
}

impl SimBus {
    /// Creates a bus with the given devices attached.
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            wire: Wire::new(devices),
            ..Default::default()
        }
    }

    /// The data line.
    pub fn wire(&self) -> &Wire {
        &self.wire
    }

    /// The data line, mutably.
    pub fn wire_mut(&mut self) -> &mut Wire {
        &mut self.wire
    }

    /// Every byte written with [`OneWire::write_byte`] or [`OneWireTransfer::start_write_byte`].
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Forgets the recorded bytes.
    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    /// Every pull-up change requested, in order.
    pub fn pull_ups(&self) -> &[PullUp] {
        &self.pull_ups
    }

    fn reset_status(&mut self) -> SimStatus {
        self.wire.reset_pulse()
    }

    fn write(&mut self, byte: u8) {
        self.written.push(byte);
        for i in 0..8 {
            self.wire.slot((byte >> i) & 1 == 1);
        }
    }

    fn read(&mut self) -> u8 {
        (0..8).fold(0, |acc, i| acc | (u8::from(self.wire.slot(true)) << i))
    }

    fn begin(&mut self, done: TransferDone<SimStatus>) -> OneWireResult<(), Infallible> {
        self.pending = Some(done);
        Ok(())
    }

    fn ensure_idle(&self) -> OneWireResult<(), Infallible> {
        if self.pending.is_some() {
            return Err(OneWireError::Busy);
        }
        Ok(())
    }
}

impl OneWire for SimBus {
    type Status = SimStatus;
    type BusError = Infallible;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        let status = self.reset_status();
        if status.shortcircuit {
            Err(OneWireError::ShortCircuit)
        } else if !status.presence {
            Err(OneWireError::NoDevicePresent)
        } else {
            Ok(status)
        }
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.write(byte);
        Ok(())
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        Ok(self.read())
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        self.wire.slot(bit);
        Ok(())
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        Ok(self.wire.slot(true))
    }
}

impl OneWireAsync for SimBus {
    type Status = SimStatus;
    type BusError = Infallible;

    async fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        OneWire::reset(self)
    }

    async fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        OneWire::write_byte(self, byte)
    }

    async fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        OneWire::read_byte(self)
    }

    async fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        OneWire::write_bit(self, bit)
    }

    async fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        OneWire::read_bit(self)
    }
}

impl OneWireTransfer for SimBus {
    type Status = SimStatus;
    type BusError = Infallible;

    fn start_reset(&mut self) -> OneWireResult<(), Self::BusError> {
        self.ensure_idle()?;
        let status = self.reset_status();
        self.begin(TransferDone::Reset(status))
    }

    fn start_write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.ensure_idle()?;
        self.write(byte);
        self.begin(TransferDone::Written)
    }

    fn start_read_byte(&mut self) -> OneWireResult<(), Self::BusError> {
        self.ensure_idle()?;
        let byte = self.read();
        self.begin(TransferDone::Read(byte))
    }

    fn poll(&mut self) -> OneWireResult<Option<TransferDone<Self::Status>>, Self::BusError> {
        Ok(self.pending.take())
    }

    fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    fn set_pull_up(&mut self, pull: PullUp) -> OneWireResult<(), Self::BusError> {
        self.pull_ups.push(pull);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{COPY_SCRATCHPAD, CONVERT_T, READ_SCRATCHPAD, SimBus, SimDevice, WRITE_SCRATCHPAD};
    use crate::{OneWire, OneWireCrc, OneWireError, OneWireStatus, OneWireTransfer, RomCode, TransferDone};

    #[test]
    fn read_scratchpad_after_conversion() {
        let rom = RomCode::with_computed_crc(0x10, 1);
        let mut bus = SimBus::new(std::vec![SimDevice::new(rom).with_temperature([0x91, 0xff])]);
        bus.address(RomCode::BROADCAST).unwrap();
        bus.write_byte(CONVERT_T).unwrap();
        bus.address(rom).unwrap();
        bus.write_byte(READ_SCRATCHPAD).unwrap();
        let mut data = [0u8; 9];
        for b in data.iter_mut() {
            *b = bus.read_byte().unwrap();
        }
        assert_eq!(&data[..2], &[0x91, 0xff]);
        assert!(OneWireCrc::validate(&data));
        assert_eq!(bus.wire().devices()[0].conversions(), 1);
    }

    #[test]
    fn write_and_copy_thresholds() {
        let rom = RomCode::with_computed_crc(0x10, 2);
        let mut bus = SimBus::new(std::vec![SimDevice::new(rom)]);
        bus.address(rom).unwrap();
        for b in [WRITE_SCRATCHPAD, 30, 0xf6] {
            bus.write_byte(b).unwrap();
        }
        bus.address(rom).unwrap();
        bus.write_byte(COPY_SCRATCHPAD).unwrap();
        assert_eq!(bus.wire().devices()[0].eeprom(), [30, 0xf6]);
        assert_eq!(&bus.wire().devices()[0].scratchpad()[2..4], &[30, 0xf6]);
    }

    #[test]
    fn shorted_line() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 3))]);
        bus.wire_mut().set_shorted(true);
        assert_eq!(OneWire::reset(&mut bus), Err(OneWireError::ShortCircuit));
        assert!(!bus.read_bit().unwrap());
    }

    #[test]
    fn transfer_rejects_second_request() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 4))]);
        bus.start_reset().unwrap();
        assert!(!bus.is_idle());
        assert_eq!(bus.start_read_byte(), Err(OneWireError::Busy));
        assert!(matches!(bus.poll(), Ok(Some(TransferDone::Reset(s))) if s.presence()));
        assert!(bus.is_idle());
        assert_eq!(bus.poll(), Ok(None));
    }
}
