use std::io::{self, Read, Write};

use embedded_onewire::PullUp;
use serialport::{ClearBuffer, SerialPort, TTYPort};
use uart_onewire::{BaudRate, SlotLine};

/// A USB-UART whose TX and RX are joined on the 1-Wire data line.
pub struct TtyLine {
    port: TTYPort,
}

impl TtyLine {
    pub fn open(path: &str) -> io::Result<Self> {
        let port = serialport::new(path, BaudRate::Data.bps())
            .timeout(std::time::Duration::from_millis(10))
            .open_native()?;
        Ok(Self { port })
    }
}

impl SlotLine for TtyLine {
    type Error = io::Error;

    fn set_baud_rate(&mut self, baud: BaudRate) -> Result<(), Self::Error> {
        self.port.set_baud_rate(baud.bps())?;
        Ok(())
    }

    fn discard_received(&mut self) -> Result<(), Self::Error> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn transmit(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.port.write_all(&[byte])?;
        self.port.flush()
    }

    fn receive(&mut self) -> nb::Result<u8, Self::Error> {
        match self.port.bytes_to_read() {
            Ok(0) => Err(nb::Error::WouldBlock),
            Ok(_) => {
                let mut buf = [0u8; 1];
                self.port
                    .read_exact(&mut buf)
                    .map_err(nb::Error::Other)?;
                Ok(buf[0])
            }
            Err(e) => Err(nb::Error::Other(e.into())),
        }
    }

    fn set_pull_up(&mut self, pull: PullUp) -> Result<(), Self::Error> {
        // the adapter has no strong pull-up; parasite-powered sensors need external power here
        log::trace!("Pull-up {pull:?} ignored");
        Ok(())
    }
}
