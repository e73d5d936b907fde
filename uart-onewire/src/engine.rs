use embedded_onewire::{OneWireError, OneWireResult, OneWireTransfer, PullUp, TransferDone};

use crate::{
    UartError,
    slot::{BaudRate, RESET_PATTERN, ResetStatus, SLOT_ONE, SlotLine, decode_echo, encode_bit},
};

/// Transfer currently on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Reset frame sent at [`BaudRate::Reset`].
    ResetPending,
    /// Slot for bit `bit` of `byte` sent.
    WritePending {
        /// Byte being written.
        byte: u8,
        /// Index of the bit whose slot is on the line.
        bit: u8,
    },
    /// Read slot for bit `bit` sent; `acc` holds the bits sampled so far.
    ReadPending {
        /// Bits received so far, least significant first.
        acc: u8,
        /// Index of the bit whose slot is on the line.
        bit: u8,
    },
}

/// Interrupt-driven transfer engine.
///
/// Runs resets and byte transfers one time slot at a time. Each echo received from
/// the line is handed to [`TransferEngine::on_slot_complete`], which sends the next
/// slot or reports the finished transfer. Only one transfer can be in flight.
#[derive(Debug)]
pub struct TransferEngine<L> {
    line: L,
    state: TransferState,
}

impl<L> TransferEngine<L> {
    /// Creates an idle engine on the given line.
    pub fn new(line: L) -> Self {
        Self {
            line,
            state: TransferState::Idle,
        }
    }

    /// Current state of the engine.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// The underlying line.
    pub fn line(&self) -> &L {
        &self.line
    }

    /// The underlying line, mutably. Transmitting on it while a transfer is
    /// in flight corrupts that transfer.
    pub fn line_mut(&mut self) -> &mut L {
        &mut self.line
    }

    /// Releases the line.
    pub fn release(self) -> L {
        self.line
    }
}

impl<L: SlotLine> TransferEngine<L> {
    fn ensure_idle(&self, op: &str) -> OneWireResult<(), UartError<L::Error>> {
        if self.state != TransferState::Idle {
            log::warn!("{op} requested while {:?} is in flight", self.state);
            return Err(OneWireError::Busy);
        }
        Ok(())
    }

    /// Handles the echo of the last slot.
    ///
    /// Sends the next slot of the running transfer, or returns the completion when
    /// the last slot has landed. An echo arriving while idle is dropped.
    ///
    /// # Errors
    /// Line errors; the running transfer is dropped and the engine is idle afterwards.
    pub fn on_slot_complete(
        &mut self,
        echo: u8,
    ) -> OneWireResult<Option<TransferDone<ResetStatus>>, UartError<L::Error>> {
        let res = self.advance(echo);
        if res.is_err() {
            self.state = TransferState::Idle;
        }
        res
    }

    fn advance(&mut self, echo: u8) -> OneWireResult<Option<TransferDone<ResetStatus>>, UartError<L::Error>> {
        match self.state {
            TransferState::Idle => {
                log::trace!("Stale echo {echo:#04x} dropped");
                Ok(None)
            }
            TransferState::ResetPending => {
                self.state = TransferState::Idle;
                self.line.set_baud_rate(BaudRate::Data).map_err(UartError::Serial)?;
                let status = ResetStatus::from_echo(echo);
                log::trace!("Reset echo {echo:#04x}, presence: {}", status.presence());
                Ok(Some(TransferDone::Reset(status)))
            }
            TransferState::WritePending { bit: 7, .. } => {
                self.state = TransferState::Idle;
                Ok(Some(TransferDone::Written))
            }
            TransferState::WritePending { byte, bit } => {
                self.line
                    .transmit(encode_bit((byte >> (bit + 1)) & 1 == 1))
                    .map_err(UartError::Serial)?;
                self.state = TransferState::WritePending { byte, bit: bit + 1 };
                Ok(None)
            }
            TransferState::ReadPending { acc, bit } => {
                let acc = acc | (u8::from(decode_echo(echo)) << bit);
                if bit == 7 {
                    self.state = TransferState::Idle;
                    log::trace!("Read {acc:#04x}");
                    return Ok(Some(TransferDone::Read(acc)));
                }
                self.line.transmit(SLOT_ONE).map_err(UartError::Serial)?;
                self.state = TransferState::ReadPending { acc, bit: bit + 1 };
                Ok(None)
            }
        }
    }

    /// Drops the transfer in flight, if any, restores the data baud rate and
    /// discards an echo that may still arrive for it.
    pub fn abort(&mut self) {
        if self.state == TransferState::Idle {
            return;
        }
        log::warn!("Aborting {:?}", self.state);
        let was_reset = self.state == TransferState::ResetPending;
        self.state = TransferState::Idle;
        if was_reset && self.line.set_baud_rate(BaudRate::Data).is_err() {
            log::error!("Could not restore the data baud rate");
        }
        if self.line.discard_received().is_err() {
            log::error!("Could not discard the echo of the aborted transfer");
        }
    }
}

impl<L: SlotLine> OneWireTransfer for TransferEngine<L> {
    type Status = ResetStatus;
    type BusError = UartError<L::Error>;

    fn start_reset(&mut self) -> OneWireResult<(), Self::BusError> {
        self.ensure_idle("Reset")?;
        self.line.set_baud_rate(BaudRate::Reset).map_err(UartError::Serial)?;
        self.line.discard_received().map_err(UartError::Serial)?;
        self.line.transmit(RESET_PATTERN).map_err(UartError::Serial)?;
        self.state = TransferState::ResetPending;
        Ok(())
    }

    fn start_write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.ensure_idle("Write")?;
        self.line.discard_received().map_err(UartError::Serial)?;
        self.line.transmit(encode_bit(byte & 1 == 1)).map_err(UartError::Serial)?;
        self.state = TransferState::WritePending { byte, bit: 0 };
        Ok(())
    }

    fn start_read_byte(&mut self) -> OneWireResult<(), Self::BusError> {
        self.ensure_idle("Read")?;
        self.line.discard_received().map_err(UartError::Serial)?;
        self.line.transmit(SLOT_ONE).map_err(UartError::Serial)?;
        self.state = TransferState::ReadPending { acc: 0, bit: 0 };
        Ok(())
    }

    fn poll(&mut self) -> OneWireResult<Option<TransferDone<Self::Status>>, Self::BusError> {
        if self.state == TransferState::Idle {
            return Ok(None);
        }
        match self.line.receive() {
            Ok(echo) => self.on_slot_complete(echo),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(e)) => {
                self.state = TransferState::Idle;
                Err(UartError::Serial(e).into())
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.state == TransferState::Idle
    }

    fn set_pull_up(&mut self, pull: PullUp) -> OneWireResult<(), Self::BusError> {
        log::trace!("Pull-up {pull:?}");
        self.line.set_pull_up(pull).map_err(UartError::Serial)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SLOT_ZERO;
    use crate::testing::{LineFault, SimLine};
    use embedded_onewire::{
        OneWireStatus, RomCode,
        consts::ONEWIRE_READ_ROM_CMD,
        sim::SimDevice,
    };

    fn run<L: SlotLine>(engine: &mut TransferEngine<L>) -> TransferDone<ResetStatus>
    where
        L::Error: core::fmt::Debug,
    {
        for _ in 0..64 {
            if let Some(done) = engine.poll().unwrap() {
                return done;
            }
        }
        panic!("transfer never completed");
    }

    fn engine(devices: std::vec::Vec<SimDevice>) -> TransferEngine<SimLine> {
        TransferEngine::new(SimLine::new(devices))
    }

    #[test]
    fn reset_detects_presence() {
        let mut engine = engine(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 1))]);
        engine.start_reset().unwrap();
        assert_eq!(engine.state(), TransferState::ResetPending);
        assert_eq!(engine.line().baud(), BaudRate::Reset);
        let TransferDone::Reset(status) = run(&mut engine) else {
            panic!("expected a reset completion");
        };
        assert!(status.presence());
        assert!(!status.shortcircuit());
        assert_eq!(engine.line().baud(), BaudRate::Data);
        assert!(engine.is_idle());
    }

    #[test]
    fn reset_on_empty_and_shorted_line() {
        let mut engine = engine(std::vec::Vec::new());
        engine.start_reset().unwrap();
        assert!(matches!(run(&mut engine), TransferDone::Reset(s) if !s.presence() && !s.shortcircuit()));
        engine.line_mut().wire_mut().set_shorted(true);
        engine.start_reset().unwrap();
        assert!(matches!(run(&mut engine), TransferDone::Reset(s) if s.shortcircuit()));
    }

    #[test]
    fn second_request_is_busy_and_leaves_first_untouched() {
        let mut engine = engine(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 1))]);
        engine.start_write_byte(0xa5).unwrap();
        let state = engine.state();
        assert_eq!(engine.start_reset(), Err(OneWireError::Busy));
        assert_eq!(engine.start_read_byte(), Err(OneWireError::Busy));
        assert_eq!(engine.start_write_byte(0x00), Err(OneWireError::Busy));
        assert_eq!(engine.state(), state);
        assert_eq!(run(&mut engine), TransferDone::Written);
        assert_eq!(engine.line().transmitted(), &[0xff, 0x00, 0xff, 0x00, 0x00, 0xff, 0x00, 0xff]);
    }

    #[test]
    fn reads_rom_slot_by_slot() {
        let rom = RomCode::with_computed_crc(0x10, 0x0008_0154_832e);
        let mut engine = engine(std::vec![SimDevice::new(rom)]);
        engine.start_reset().unwrap();
        run(&mut engine);
        engine.start_write_byte(ONEWIRE_READ_ROM_CMD).unwrap();
        assert_eq!(run(&mut engine), TransferDone::Written);
        let mut bytes = [0u8; 8];
        for b in bytes.iter_mut() {
            engine.start_read_byte().unwrap();
            let TransferDone::Read(v) = run(&mut engine) else {
                panic!("expected a read completion");
            };
            *b = v;
        }
        assert_eq!(RomCode::from_bytes(bytes), rom);
    }

    #[test]
    fn slow_echo_keeps_transfer_pending() {
        let mut engine = engine(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 1))]);
        engine.line_mut().set_latency(3);
        engine.start_read_byte().unwrap();
        for _ in 0..3 {
            assert_eq!(engine.poll(), Ok(None));
            assert_eq!(engine.state(), TransferState::ReadPending { acc: 0, bit: 0 });
        }
        assert_eq!(engine.poll(), Ok(None));
        assert_eq!(engine.state(), TransferState::ReadPending { acc: 1, bit: 1 });
    }

    #[test]
    fn stale_echo_is_dropped() {
        let mut engine = engine(std::vec::Vec::new());
        assert_eq!(engine.on_slot_complete(0xff), Ok(None));
        assert!(engine.is_idle());
        assert_eq!(engine.poll(), Ok(None));
    }

    #[test]
    fn line_error_returns_to_idle() {
        let mut engine = engine(std::vec![SimDevice::new(RomCode::with_computed_crc(0x10, 1))]);
        engine.start_write_byte(0xff).unwrap();
        engine.line_mut().set_faulty(true);
        assert_eq!(engine.poll(), Err(OneWireError::Other(UartError::Serial(LineFault))));
        assert!(engine.is_idle());
        engine.line_mut().set_faulty(false);
        engine.start_reset().unwrap();
        assert!(matches!(run(&mut engine), TransferDone::Reset(s) if s.presence()));
    }

    #[test]
    fn abort_restores_data_rate() {
        let mut engine = engine(std::vec::Vec::new());
        engine.line_mut().set_mute(true);
        engine.start_reset().unwrap();
        assert_eq!(engine.poll(), Ok(None));
        engine.abort();
        assert!(engine.is_idle());
        assert_eq!(engine.line().baud(), BaudRate::Data);
    }

    #[test]
    fn echo_of_aborted_transfer_is_discarded() {
        // empty bus: read slots echo back high, write-0 slots low
        let mut engine = engine(std::vec::Vec::new());
        engine.line_mut().set_latency(2);
        engine.start_write_byte(0x00).unwrap();
        engine.abort();
        assert_eq!(engine.line().pending(), 0);
        engine.line_mut().set_latency(0);
        engine.start_read_byte().unwrap();
        assert_eq!(run(&mut engine), TransferDone::Read(0xff));
    }

    #[test]
    fn buffered_echo_is_dropped_before_a_new_transfer() {
        let mut engine = engine(std::vec::Vec::new());
        engine.line_mut().transmit(SLOT_ZERO).unwrap();
        assert_eq!(engine.line().pending(), 1);
        engine.start_read_byte().unwrap();
        assert_eq!(run(&mut engine), TransferDone::Read(0xff));
    }
}
