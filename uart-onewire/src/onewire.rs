use crate::{ResetStatus, SlotLine, UartError, UartOneWire, reset_outcome, send_slot};
use embedded_hal::delay::DelayNs;
use embedded_onewire::{
    OneWire, OneWireError, OneWireResult, OneWireTransfer, PullUp, TransferDone,
};

impl<L: SlotLine, D: DelayNs> UartOneWire<L, D> {
    /// Polls the engine until the running transfer completes or the time budget runs out.
    fn wait(&mut self) -> OneWireResult<TransferDone<ResetStatus>, UartError<L::Error>> {
        for _ in 0..self.timing.attempts() {
            if let Some(done) = self.engine.poll()? {
                return Ok(done);
            }
            self.delay.delay_us(self.timing.poll_us);
        }
        Err(self.timed_out())
    }

    fn bit(&mut self, bit: bool) -> OneWireResult<bool, UartError<L::Error>> {
        self.ensure_idle()?;
        match send_slot(self.engine.line_mut(), &mut self.delay, self.timing, bit) {
            Ok(Some(v)) => Ok(v),
            Ok(None) => Err(self.timed_out()),
            Err(e) => Err(OneWireError::Other(UartError::Serial(e))),
        }
    }
}

impl<L: SlotLine, D: DelayNs> OneWire for UartOneWire<L, D> {
    type Status = ResetStatus;

    type BusError = UartError<L::Error>;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        self.engine.start_reset()?;
        reset_outcome(self.wait()?)
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.engine.start_write_byte(byte)?;
        match self.wait()? {
            TransferDone::Written => Ok(()),
            _ => Err(OneWireError::Busy),
        }
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        self.engine.start_read_byte()?;
        match self.wait()? {
            TransferDone::Read(byte) => Ok(byte),
            _ => Err(OneWireError::Busy),
        }
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        self.bit(bit)?;
        Ok(())
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        self.bit(true)
    }
}

impl<L: SlotLine, D> OneWireTransfer for UartOneWire<L, D> {
    type Status = ResetStatus;
    type BusError = UartError<L::Error>;

    fn start_reset(&mut self) -> OneWireResult<(), Self::BusError> {
        self.engine.start_reset()
    }

    fn start_write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.engine.start_write_byte(byte)
    }

    fn start_read_byte(&mut self) -> OneWireResult<(), Self::BusError> {
        self.engine.start_read_byte()
    }

    fn poll(&mut self) -> OneWireResult<Option<TransferDone<Self::Status>>, Self::BusError> {
        self.engine.poll()
    }

    fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }

    fn set_pull_up(&mut self, pull: PullUp) -> OneWireResult<(), Self::BusError> {
        self.engine.set_pull_up(pull)
    }
}
