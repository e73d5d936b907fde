use embedded_onewire::{
    MatchProgress, OneWireCrc, OneWireError, OneWireResult, OneWireTransfer, PullUp, RomCode,
    RomMatch, TransferDone,
};

use crate::{CONVERT_T, READ_SCRATCHPAD, SCRATCHPAD_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Convert,
    ReadScratchpad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Idle,
    AwaitingMatch(Job),
    SendingConvert,
    SendingCommand,
    /// Index of the scratchpad byte being read
    AwaitingReadByte(u8),
}

/// What a completed transfer led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The next transfer of the sequence is running.
    Pending,
    /// The convert command went out and the line is on the strong pull-up.
    /// The result is ready after [`CONVERSION_TIME_MS`](crate::CONVERSION_TIME_MS).
    ConversionStarted(RomCode),
    /// All nine scratchpad bytes arrived.
    Scratchpad {
        rom: RomCode,
        data: [u8; SCRATCHPAD_LEN],
        crc_ok: bool,
    },
}

/// Convert and scratchpad-read sequences, one transfer at a time.
///
/// Start a sequence, then hand every completion of the bus to
/// [`Ds1820Reader::on_transfer_complete`] until it reports something other than
/// [`ReaderEvent::Pending`].
#[derive(Debug, Clone)]
pub struct Ds1820Reader {
    step: Step,
    rom: RomCode,
    matcher: RomMatch,
    data: [u8; SCRATCHPAD_LEN],
    crc: OneWireCrc,
}

impl Default for Ds1820Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl Ds1820Reader {
    pub const fn new() -> Self {
        Self {
            step: Step::Idle,
            rom: RomCode::BROADCAST,
            matcher: RomMatch::new(),
            data: [0; SCRATCHPAD_LEN],
            crc: OneWireCrc::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.step == Step::Idle
    }

    /// Drops the running sequence, e.g. after the bus timed out.
    pub fn abort(&mut self) {
        if !self.is_idle() {
            log::warn!("{:?} on {} aborted", self.step, self.rom);
        }
        self.matcher.abort();
        self.step = Step::Idle;
    }

    /// Starts a temperature conversion on `rom`, or on every device for [`RomCode::BROADCAST`].
    pub fn start_conversion<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        rom: RomCode,
    ) -> OneWireResult<(), T::BusError> {
        self.begin(bus, rom, Job::Convert)
    }

    /// Starts reading the scratchpad of `rom`.
    pub fn start_temperature_read<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        rom: RomCode,
    ) -> OneWireResult<(), T::BusError> {
        self.begin(bus, rom, Job::ReadScratchpad)
    }

    fn begin<T: OneWireTransfer>(&mut self, bus: &mut T, rom: RomCode, job: Job) -> OneWireResult<(), T::BusError> {
        if !self.is_idle() {
            log::warn!("{job:?} on {rom} requested while {:?} on {} is running", self.step, self.rom);
            return Err(OneWireError::Busy);
        }
        bus.set_pull_up(PullUp::Weak)?;
        self.matcher.start(bus, rom)?;
        log::debug!("{job:?} on {rom}");
        self.rom = rom;
        self.step = Step::AwaitingMatch(job);
        Ok(())
    }

    /// Advances the running sequence with the completion of its last transfer.
    ///
    /// # Errors
    /// [`OneWireError::NoDevicePresent`] if nobody answered the reset, or any bus error.
    /// The sequence is dropped and the reader is idle afterwards.
    pub fn on_transfer_complete<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        done: TransferDone<T::Status>,
    ) -> OneWireResult<ReaderEvent, T::BusError> {
        let res = self.step(bus, done);
        if res.is_err() {
            self.step = Step::Idle;
        }
        res
    }

    fn step<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        done: TransferDone<T::Status>,
    ) -> OneWireResult<ReaderEvent, T::BusError> {
        match (self.step, done) {
            (Step::AwaitingMatch(job), done) => {
                if self.matcher.advance(bus, done)? == MatchProgress::Pending {
                    return Ok(ReaderEvent::Pending);
                }
                match job {
                    Job::Convert => {
                        bus.start_write_byte(CONVERT_T)?;
                        self.step = Step::SendingConvert;
                    }
                    Job::ReadScratchpad => {
                        bus.start_write_byte(READ_SCRATCHPAD)?;
                        self.step = Step::SendingCommand;
                    }
                }
                Ok(ReaderEvent::Pending)
            }
            (Step::SendingConvert, TransferDone::Written) => {
                // parasite-powered devices draw their conversion current from the line
                bus.set_pull_up(PullUp::Strong)?;
                self.step = Step::Idle;
                Ok(ReaderEvent::ConversionStarted(self.rom))
            }
            (Step::SendingCommand, TransferDone::Written) => {
                self.crc = OneWireCrc::new();
                bus.start_read_byte()?;
                self.step = Step::AwaitingReadByte(0);
                Ok(ReaderEvent::Pending)
            }
            (Step::AwaitingReadByte(i), TransferDone::Read(byte)) => {
                self.data[usize::from(i)] = byte;
                self.crc.update(byte);
                if usize::from(i) + 1 < SCRATCHPAD_LEN {
                    bus.start_read_byte()?;
                    self.step = Step::AwaitingReadByte(i + 1);
                    return Ok(ReaderEvent::Pending);
                }
                self.step = Step::Idle;
                let crc_ok = self.crc.value() == 0;
                log::debug!("Scratchpad of {}: {:02x?}, CRC ok: {crc_ok}", self.rom, self.data);
                Ok(ReaderEvent::Scratchpad {
                    rom: self.rom,
                    data: self.data,
                    crc_ok,
                })
            }
            (step, _) => {
                // another initiator interleaved a transfer
                log::error!("Reader in step {step:?} received an unexpected completion");
                Err(OneWireError::Busy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_onewire::sim::{SimBus, SimDevice};
    use std::vec::Vec;

    fn drive(reader: &mut Ds1820Reader, bus: &mut SimBus) -> OneWireResult<ReaderEvent, core::convert::Infallible> {
        loop {
            let done = bus.poll()?.expect("simulated transfers complete immediately");
            match reader.on_transfer_complete(bus, done)? {
                ReaderEvent::Pending => continue,
                event => return Ok(event),
            }
        }
    }

    fn rom(serial: u64) -> RomCode {
        RomCode::with_computed_crc(crate::DS1820_FAMILY, serial)
    }

    #[test]
    fn conversion_ends_on_strong_pull_up() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(rom(1)), SimDevice::new(rom(2))]);
        let mut reader = Ds1820Reader::new();
        reader.start_conversion(&mut bus, RomCode::BROADCAST).unwrap();
        assert_eq!(drive(&mut reader, &mut bus), Ok(ReaderEvent::ConversionStarted(RomCode::BROADCAST)));
        assert_eq!(bus.pull_ups(), &[PullUp::Weak, PullUp::Strong]);
        assert!(bus.wire().devices().iter().all(|d| d.conversions() == 1));
        assert!(reader.is_idle());
    }

    #[test]
    fn scratchpad_read_checks_crc() {
        let mut bus = SimBus::new(std::vec![
            SimDevice::new(rom(1)).with_temperature([0x91, 0xff]),
            SimDevice::new(rom(2)),
        ]);
        let mut reader = Ds1820Reader::new();
        reader.start_conversion(&mut bus, RomCode::BROADCAST).unwrap();
        drive(&mut reader, &mut bus).unwrap();

        reader.start_temperature_read(&mut bus, rom(1)).unwrap();
        let ReaderEvent::Scratchpad { rom: r, data, crc_ok } = drive(&mut reader, &mut bus).unwrap() else {
            panic!("expected a scratchpad");
        };
        assert_eq!(r, rom(1));
        assert_eq!(&data[..2], &[0x91, 0xff]);
        assert!(crc_ok);

        bus.wire_mut().devices_mut()[1].set_crc_fault(true);
        reader.start_conversion(&mut bus, rom(2)).unwrap();
        drive(&mut reader, &mut bus).unwrap();
        reader.start_temperature_read(&mut bus, rom(2)).unwrap();
        assert!(matches!(
            drive(&mut reader, &mut bus),
            Ok(ReaderEvent::Scratchpad { crc_ok: false, .. })
        ));
    }

    #[test]
    fn second_request_is_busy() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(rom(1))]);
        let mut reader = Ds1820Reader::new();
        reader.start_temperature_read(&mut bus, rom(1)).unwrap();
        assert_eq!(reader.start_conversion(&mut bus, rom(1)), Err(OneWireError::Busy));
        assert!(matches!(drive(&mut reader, &mut bus), Ok(ReaderEvent::Scratchpad { .. })));
    }

    #[test]
    fn abort_allows_new_sequence() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(rom(1))]);
        let mut reader = Ds1820Reader::new();
        reader.start_temperature_read(&mut bus, rom(1)).unwrap();
        let done = bus.poll().unwrap().unwrap();
        assert_eq!(reader.on_transfer_complete(&mut bus, done), Ok(ReaderEvent::Pending));
        reader.abort();
        assert!(reader.is_idle());
        bus.poll().unwrap();
        reader.start_conversion(&mut bus, rom(1)).unwrap();
        assert_eq!(drive(&mut reader, &mut bus), Ok(ReaderEvent::ConversionStarted(rom(1))));
    }

    #[test]
    fn missing_device_aborts_sequence() {
        let mut bus = SimBus::new(Vec::new());
        let mut reader = Ds1820Reader::new();
        reader.start_temperature_read(&mut bus, rom(1)).unwrap();
        assert_eq!(drive(&mut reader, &mut bus), Err(OneWireError::NoDevicePresent));
        assert!(reader.is_idle());
        assert!(bus.written().is_empty());
        assert!(reader.start_conversion(&mut bus, rom(1)).is_ok());
    }
}
