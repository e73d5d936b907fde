#![no_std]
#![deny(missing_docs)]

/*! # uart-onewire
 *
 * A 1-Wire bus master built from a half-duplex UART: TX and RX joined on the
 * open-drain data line, each time slot sent as one frame and read back from its echo.
 *
 * [`TransferEngine`] runs resets and byte transfers one slot at a time from the echo
 * of the previous slot, which makes it suitable for a receive interrupt.
 * [`UartOneWire`] owns the engine and implements the blocking [`OneWire`],
 * asynchronous [`OneWireAsync`] and completion-driven [`OneWireTransfer`] traits.
 */

#[cfg(test)]
extern crate std;

pub use embedded_onewire::{OneWire, OneWireAsync, OneWireError, OneWireResult, OneWireTransfer};
mod engine;
mod error;
mod onewire;
mod onewire_async;
mod slot;
#[cfg(test)]
mod testing;

pub use engine::{TransferEngine, TransferState};
pub use error::UartError;
pub use slot::{
    BaudRate, RESET_PATTERN, ResetStatus, SLOT_ONE, SLOT_ZERO, SlotLine, SlotTiming, decode_echo,
    encode_bit, send_slot,
};

/// A 1-Wire bus master on a half-duplex UART.
///
/// Takes ownership of a line (implementing [`SlotLine`])
/// and a timer object implementing the [`DelayNs`](embedded_hal::delay::DelayNs) trait,
/// or its asynchronous counterpart.
pub struct UartOneWire<L, D> {
    pub(crate) engine: TransferEngine<L>,
    pub(crate) delay: D,
    pub(crate) timing: SlotTiming,
}

/// Builder for creating a [`UartOneWire`] instance with custom configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct UartOneWireBuilder {
    pub(crate) timing: SlotTiming,
}

impl UartOneWireBuilder {
    /// Sets how long the blocking and async operations wait for each echo.
    pub fn with_timeout_us(mut self, timeout_us: u32) -> Self {
        self.timing.timeout_us = timeout_us;
        self
    }

    /// Sets the delay between two checks of the line while waiting for an echo.
    pub fn with_poll_interval_us(mut self, poll_us: u32) -> Self {
        self.timing.poll_us = poll_us.max(1);
        self
    }

    fn assemble<L, D>(self, line: L, delay: D) -> UartOneWire<L, D> {
        UartOneWire {
            engine: TransferEngine::new(line),
            delay,
            timing: self.timing,
        }
    }

    /// Builds a new [`UartOneWire`] instance.
    ///
    /// Switches the line to the data baud rate and the weak pull-up, then issues a
    /// reset pulse. An empty bus is not an error at this point.
    ///
    /// # Errors
    /// Line errors, a shorted bus or a reset that timed out.
    pub fn build<L: SlotLine, D: embedded_hal::delay::DelayNs>(
        self,
        line: L,
        delay: D,
    ) -> OneWireResult<UartOneWire<L, D>, UartError<L::Error>> {
        let mut dev = self.assemble(line, delay);
        dev.configure()?;
        match OneWire::reset(&mut dev) {
            Ok(_) => {}
            Err(OneWireError::NoDevicePresent) => log::debug!("No device on the bus yet"),
            Err(e) => return Err(e),
        }
        Ok(dev)
    }

    /// Builds a new [`UartOneWire`] instance for use with [`OneWireAsync`].
    /// See [`UartOneWireBuilder::build`].
    pub async fn build_async<L: SlotLine, D: embedded_hal_async::delay::DelayNs>(
        self,
        line: L,
        delay: D,
    ) -> OneWireResult<UartOneWire<L, D>, UartError<L::Error>> {
        let mut dev = self.assemble(line, delay);
        dev.configure()?;
        match OneWireAsync::reset(&mut dev).await {
            Ok(_) => {}
            Err(OneWireError::NoDevicePresent) => log::debug!("No device on the bus yet"),
            Err(e) => return Err(e),
        }
        Ok(dev)
    }
}

impl<L, D> UartOneWire<L, D> {
    /// Time budget used while waiting for echoes.
    pub fn timing(&self) -> SlotTiming {
        self.timing
    }

    /// The transfer engine driving the line.
    pub fn engine(&self) -> &TransferEngine<L> {
        &self.engine
    }

    /// The transfer engine, mutably; hand it the echoes from a receive interrupt.
    pub fn engine_mut(&mut self) -> &mut TransferEngine<L> {
        &mut self.engine
    }

    /// Releases the line and the timer.
    pub fn release(self) -> (L, D) {
        (self.engine.release(), self.delay)
    }
}

impl<L: SlotLine, D> UartOneWire<L, D> {
    fn configure(&mut self) -> OneWireResult<(), UartError<L::Error>> {
        let line = self.engine.line_mut();
        line.set_baud_rate(BaudRate::Data).map_err(UartError::Serial)?;
        line.set_pull_up(embedded_onewire::PullUp::Weak)
            .map_err(UartError::Serial)?;
        line.discard_received().map_err(UartError::Serial)?;
        Ok(())
    }

    pub(crate) fn ensure_idle(&self) -> OneWireResult<(), UartError<L::Error>> {
        if !self.engine.is_idle() {
            log::warn!("Bus busy with {:?}", self.engine.state());
            return Err(OneWireError::Busy);
        }
        Ok(())
    }

    pub(crate) fn timed_out(&mut self) -> OneWireError<UartError<L::Error>> {
        log::error!(
            "No echo within {} us while in {:?}",
            self.timing.timeout_us,
            self.engine.state()
        );
        self.engine.abort();
        OneWireError::Other(UartError::Timeout)
    }
}

/// Unwraps the reset status of a completed reset.
pub(crate) fn reset_outcome<E>(
    done: embedded_onewire::TransferDone<ResetStatus>,
) -> OneWireResult<ResetStatus, E> {
    match done {
        embedded_onewire::TransferDone::Reset(status) if status.short_detect() => {
            Err(OneWireError::ShortCircuit)
        }
        embedded_onewire::TransferDone::Reset(status) if !status.presence() => {
            Err(OneWireError::NoDevicePresent)
        }
        embedded_onewire::TransferDone::Reset(status) => Ok(status),
        // another initiator interleaved a transfer
        _ => Err(OneWireError::Busy),
    }
}
