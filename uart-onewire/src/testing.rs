//! UART loopback over the simulated 1-Wire line.
use embedded_onewire::{
    OneWireStatus, PullUp,
    sim::{SimDevice, Wire},
};
use std::{collections::VecDeque, vec::Vec};

use crate::slot::{BaudRate, RESET_PATTERN, SLOT_ONE, SLOT_ZERO, SlotLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineFault;

/// Echoes every frame the way a UART with TX and RX joined on the line would.
pub(crate) struct SimLine {
    wire: Wire,
    baud: BaudRate,
    rx: VecDeque<u8>,
    latency: u32,
    countdown: u32,
    mute: bool,
    faulty: bool,
    transmitted: Vec<u8>,
    pull_ups: Vec<PullUp>,
}

impl SimLine {
    pub(crate) fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            wire: Wire::new(devices),
            baud: BaudRate::Data,
            rx: VecDeque::new(),
            latency: 0,
            countdown: 0,
            mute: false,
            faulty: false,
            transmitted: Vec::new(),
            pull_ups: Vec::new(),
        }
    }

    pub(crate) fn wire(&self) -> &Wire {
        &self.wire
    }

    pub(crate) fn wire_mut(&mut self) -> &mut Wire {
        &mut self.wire
    }

    pub(crate) fn baud(&self) -> BaudRate {
        self.baud
    }

    /// Number of `receive` calls answered with `WouldBlock` before each echo shows up.
    pub(crate) fn set_latency(&mut self, polls: u32) {
        self.latency = polls;
    }

    /// Frames are sent but never echoed.
    pub(crate) fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    /// Every receive fails.
    pub(crate) fn set_faulty(&mut self, faulty: bool) {
        self.faulty = faulty;
    }

    /// Echoes received but not consumed yet.
    pub(crate) fn pending(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn transmitted(&self) -> &[u8] {
        &self.transmitted
    }

    pub(crate) fn pull_ups(&self) -> &[PullUp] {
        &self.pull_ups
    }

    fn echo(&mut self, byte: u8) -> u8 {
        match (self.baud, byte) {
            (BaudRate::Reset, RESET_PATTERN) => {
                let status = self.wire.reset_pulse();
                if status.shortcircuit() {
                    0x00
                } else if status.presence() {
                    0xe0
                } else {
                    RESET_PATTERN
                }
            }
            (BaudRate::Reset, other) => other,
            (BaudRate::Data, SLOT_ZERO) => {
                self.wire.slot(false);
                SLOT_ZERO
            }
            (BaudRate::Data, SLOT_ONE) => {
                if self.wire.slot(true) {
                    SLOT_ONE
                } else {
                    0xfc
                }
            }
            // Neither a clean write-0 nor a read slot; a device sees a zero
            (BaudRate::Data, other) => {
                self.wire.slot(false);
                other & 0x01
            }
        }
    }
}

impl SlotLine for SimLine {
    type Error = LineFault;

    fn set_baud_rate(&mut self, baud: BaudRate) -> Result<(), Self::Error> {
        self.baud = baud;
        Ok(())
    }

    fn discard_received(&mut self) -> Result<(), Self::Error> {
        self.rx.clear();
        Ok(())
    }

    fn transmit(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.transmitted.push(byte);
        let echo = self.echo(byte);
        if !self.mute {
            self.rx.push_back(echo);
            self.countdown = self.latency;
        }
        Ok(())
    }

    fn receive(&mut self) -> nb::Result<u8, Self::Error> {
        if self.faulty {
            return Err(nb::Error::Other(LineFault));
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return Err(nb::Error::WouldBlock);
        }
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn set_pull_up(&mut self, pull: PullUp) -> Result<(), Self::Error> {
        self.pull_ups.push(pull);
        Ok(())
    }
}
