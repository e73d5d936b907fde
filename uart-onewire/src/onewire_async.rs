use crate::{ResetStatus, SlotLine, UartError, UartOneWire, decode_echo, encode_bit, reset_outcome};
use embedded_hal_async::delay::DelayNs;
use embedded_onewire::{OneWireAsync, OneWireError, OneWireResult, OneWireTransfer, TransferDone};

impl<L: SlotLine, D: DelayNs> UartOneWire<L, D> {
    async fn wait_async(&mut self) -> OneWireResult<TransferDone<ResetStatus>, UartError<L::Error>> {
        for _ in 0..self.timing.attempts() {
            if let Some(done) = self.engine.poll()? {
                return Ok(done);
            }
            self.delay.delay_us(self.timing.poll_us).await;
        }
        Err(self.timed_out())
    }

    async fn bit_async(&mut self, bit: bool) -> OneWireResult<bool, UartError<L::Error>> {
        self.ensure_idle()?;
        let line = self.engine.line_mut();
        line.transmit(encode_bit(bit)).map_err(UartError::Serial)?;
        for _ in 0..self.timing.attempts() {
            match self.engine.line_mut().receive() {
                Ok(echo) => return Ok(decode_echo(echo)),
                Err(nb::Error::WouldBlock) => self.delay.delay_us(self.timing.poll_us).await,
                Err(nb::Error::Other(e)) => return Err(OneWireError::Other(UartError::Serial(e))),
            }
        }
        Err(self.timed_out())
    }
}

impl<L: SlotLine, D: DelayNs> OneWireAsync for UartOneWire<L, D> {
    type Status = ResetStatus;

    type BusError = UartError<L::Error>;

    async fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        self.engine.start_reset()?;
        reset_outcome(self.wait_async().await?)
    }

    async fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.engine.start_write_byte(byte)?;
        match self.wait_async().await? {
            TransferDone::Written => Ok(()),
            _ => Err(OneWireError::Busy),
        }
    }

    async fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        self.engine.start_read_byte()?;
        match self.wait_async().await? {
            TransferDone::Read(byte) => Ok(byte),
            _ => Err(OneWireError::Busy),
        }
    }

    async fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        self.bit_async(bit).await?;
        Ok(())
    }

    async fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        self.bit_async(true).await
    }
}
