use crate::{
    OneWireError, OneWireResult, OneWireStatus, OneWireTransfer, RomCode, TransferDone,
    consts::{ONEWIRE_MATCH_ROM_CMD, ONEWIRE_SKIP_ROM_CMD},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Idle,
    Resetting,
    SendingCommand,
    /// Index of the ROM byte currently being written
    SendingAddress(u8),
}

/// Outcome of the last ROM match sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The device (or all devices, for [`RomCode::BROADCAST`]) is addressed.
    Matched,
    /// No device answered the reset pulse.
    NoDevice,
}

/// Progress reported by [`RomMatch::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchProgress {
    /// The sequence started its next transfer.
    Pending,
    /// The last transfer of the sequence completed; the device accepts a function command.
    Matched,
}

/// Reset + MATCH ROM (or SKIP ROM) sequence over a [`OneWireTransfer`] bus.
///
/// Every step starts the next transfer from the completion of the previous one,
/// since the bus accepts no new transfer until the last time slot has landed.
/// Feed every [`TransferDone`] of the bus into [`RomMatch::advance`] while the
/// sequence is running.
#[derive(Debug, Clone)]
pub struct RomMatch {
    step: Step,
    rom: RomCode,
    outcome: Option<MatchOutcome>,
}

impl Default for RomMatch {
    fn default() -> Self {
        Self::new()
    }
}

impl RomMatch {
    /// Creates an idle sequencer.
    pub const fn new() -> Self {
        Self {
            step: Step::Idle,
            rom: RomCode::BROADCAST,
            outcome: None,
        }
    }

    /// Starts addressing `rom`, or every device for [`RomCode::BROADCAST`].
    ///
    /// # Errors
    /// [`OneWireError::Busy`] if a match is already in progress or the bus is busy.
    pub fn start<T: OneWireTransfer>(&mut self, bus: &mut T, rom: RomCode) -> OneWireResult<(), T::BusError> {
        if self.in_progress() {
            log::warn!("ROM match for {} requested while matching {}", rom, self.rom);
            return Err(OneWireError::Busy);
        }
        bus.start_reset()?;
        self.rom = rom;
        self.outcome = None;
        self.step = Step::Resetting;
        Ok(())
    }

    /// Advances the sequence with the completion of its last transfer.
    ///
    /// # Errors
    /// [`OneWireError::NoDevicePresent`] if the reset found no device; the sequence
    /// stops there and does not report [`MatchProgress::Matched`]. Bus errors abort
    /// the sequence as well.
    pub fn advance<T: OneWireTransfer>(
        &mut self,
        bus: &mut T,
        done: TransferDone<T::Status>,
    ) -> OneWireResult<MatchProgress, T::BusError> {
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
    ) -> OneWireResult<MatchProgress, T::BusError> {
        match (self.step, done) {
            (Step::Resetting, TransferDone::Reset(status)) => {
                if !status.presence() || status.shortcircuit() {
                    log::warn!("No device or bus error while matching {}", self.rom);
                    self.outcome = Some(MatchOutcome::NoDevice);
                    return Err(if status.shortcircuit() {
                        OneWireError::ShortCircuit
                    } else {
                        OneWireError::NoDevicePresent
                    });
                }
                let cmd = if self.rom.is_broadcast() {
                    ONEWIRE_SKIP_ROM_CMD
                } else {
                    ONEWIRE_MATCH_ROM_CMD
                };
                bus.start_write_byte(cmd)?;
                self.step = Step::SendingCommand;
                Ok(MatchProgress::Pending)
            }
            (Step::SendingCommand, TransferDone::Written) if self.rom.is_broadcast() => Ok(self.finish()),
            (Step::SendingCommand, TransferDone::Written) => {
                bus.start_write_byte(self.rom.to_bytes()[0])?;
                self.step = Step::SendingAddress(0);
                Ok(MatchProgress::Pending)
            }
            (Step::SendingAddress(7), TransferDone::Written) => Ok(self.finish()),
            (Step::SendingAddress(i), TransferDone::Written) => {
                bus.start_write_byte(self.rom.to_bytes()[usize::from(i) + 1])?;
                self.step = Step::SendingAddress(i + 1);
                Ok(MatchProgress::Pending)
            }
            (step, _) => {
                // another initiator interleaved a transfer
                log::error!("ROM match in step {step:?} received an unexpected completion");
                Err(OneWireError::Busy)
            }
        }
    }

    fn finish(&mut self) -> MatchProgress {
        log::trace!("Matched {}", self.rom);
        self.step = Step::Idle;
        self.outcome = Some(MatchOutcome::Matched);
        MatchProgress::Matched
    }

    /// Drops a running sequence without waiting for its transfer.
    ///
    /// The bus itself is left alone; abort its transfer separately.
    pub fn abort(&mut self) {
        if self.in_progress() {
            log::warn!("ROM match for {} aborted in step {:?}", self.rom, self.step);
            self.step = Step::Idle;
        }
    }

    /// Returns `true` while a sequence is running.
    pub fn in_progress(&self) -> bool {
        self.step != Step::Idle
    }

    /// Outcome of the most recent sequence, `None` while it is running or before the first one.
    pub fn result(&self) -> Option<MatchOutcome> {
        if self.in_progress() { None } else { self.outcome }
    }

    /// ROM code of the most recent sequence.
    pub fn rom(&self) -> RomCode {
        self.rom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimDevice};
    use std::vec::Vec;

    fn drive(matcher: &mut RomMatch, bus: &mut SimBus) -> OneWireResult<MatchProgress, core::convert::Infallible> {
        loop {
            let done = bus.poll()?.expect("transfer completes immediately on the simulated bus");
            match matcher.advance(bus, done)? {
                MatchProgress::Pending => continue,
                MatchProgress::Matched => return Ok(MatchProgress::Matched),
            }
        }
    }

    #[test]
    fn broadcast_match_is_repeatable() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 5))]);
        let mut matcher = RomMatch::new();
        for _ in 0..5 {
            matcher.start(&mut bus, RomCode::BROADCAST).unwrap();
            assert_eq!(matcher.result(), None);
            assert_eq!(drive(&mut matcher, &mut bus), Ok(MatchProgress::Matched));
            assert_eq!(matcher.result(), Some(MatchOutcome::Matched));
            assert!(bus.wire().devices()[0].is_selected());
        }
        assert_eq!(bus.written().last(), Some(&ONEWIRE_SKIP_ROM_CMD));
    }

    #[test]
    fn match_writes_command_and_address() {
        let roms: Vec<RomCode> = (1..=3).map(|s| RomCode::with_computed_crc(0x10, s)).collect();
        let mut bus = SimBus::new(roms.iter().copied().map(SimDevice::new).collect());
        let mut matcher = RomMatch::new();
        matcher.start(&mut bus, roms[1]).unwrap();
        assert_eq!(drive(&mut matcher, &mut bus), Ok(MatchProgress::Matched));
        let mut expected = std::vec![ONEWIRE_MATCH_ROM_CMD];
        expected.extend_from_slice(&roms[1].to_bytes());
        assert_eq!(bus.written(), &expected[..]);
        let selected: Vec<bool> = bus.wire().devices().iter().map(SimDevice::is_selected).collect();
        assert_eq!(selected, [false, true, false]);
    }

    #[test]
    fn second_start_is_busy() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 5))]);
        let mut matcher = RomMatch::new();
        matcher.start(&mut bus, RomCode::BROADCAST).unwrap();
        assert_eq!(matcher.start(&mut bus, RomCode::BROADCAST), Err(OneWireError::Busy));
        assert!(matcher.in_progress());
        assert_eq!(drive(&mut matcher, &mut bus), Ok(MatchProgress::Matched));
    }

    #[test]
    fn empty_bus_stops_sequence() {
        let mut bus = SimBus::new(Vec::new());
        let mut matcher = RomMatch::new();
        matcher.start(&mut bus, RomCode::BROADCAST).unwrap();
        assert_eq!(drive(&mut matcher, &mut bus), Err(OneWireError::NoDevicePresent));
        assert_eq!(matcher.result(), Some(MatchOutcome::NoDevice));
        assert!(bus.written().is_empty());
        // the sequencer is usable again
        assert!(matcher.start(&mut bus, RomCode::BROADCAST).is_ok());
    }

    #[test]
    fn abort_frees_sequencer() {
        let mut bus = SimBus::new(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 5))]);
        let mut matcher = RomMatch::new();
        matcher.start(&mut bus, RomCode::BROADCAST).unwrap();
        matcher.abort();
        assert!(!matcher.in_progress());
        // drop the reset completion the bus still holds
        assert!(bus.poll().unwrap().is_some());
        matcher.start(&mut bus, RomCode::BROADCAST).unwrap();
        assert_eq!(drive(&mut matcher, &mut bus), Ok(MatchProgress::Matched));
    }
}
