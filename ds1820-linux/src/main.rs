use std::time::{Duration, Instant};

use clap::Parser;
use ds1820::{CONVERSION_TIME_MS, Ds1820Group, GroupEvent};
use embedded_onewire::{OneWireError, OneWireResult, OneWireTransfer, RomCode};
use uart_onewire::{UartError, UartOneWire, UartOneWireBuilder};

mod tty;

use tty::TtyLine;

/// Largest number of sensors tracked on one bus
const CAPACITY: usize = 32;

type Bus = UartOneWire<TtyLine, linux_embedded_hal::Delay>;
type BusResult<T> = OneWireResult<T, UartError<std::io::Error>>;

/// Reads DS1820 sensors through a serial port wired as a 1-Wire master
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the serial port, TX and RX joined on the data line (e.g., /dev/ttyUSB0)
    #[arg(short, long)]
    path: String,
    /// Number of sensors to read
    #[arg(short, long, default_value_t = 5)]
    max_devices: usize,
    /// Family code to search for, in hex; 0 finds every device
    #[arg(short, long, default_value = "10", value_parser = parse_hex)]
    family: u8,
    /// Pause between two measurements, in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,
    /// Time to wait for each slot echo, in microseconds
    #[arg(short, long, default_value_t = 20_000)]
    timeout_us: u32,
}

fn parse_hex(s: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// Feeds bus completions to the group until its sequence finishes.
fn pump(bus: &mut Bus, group: &mut Ds1820Group<CAPACITY>, budget: Duration) -> BusResult<GroupEvent> {
    let deadline = Instant::now() + budget;
    loop {
        if let Some(done) = bus.poll()? {
            match group.on_transfer_complete(bus, done)? {
                GroupEvent::Pending => continue,
                event => return Ok(event),
            }
        }
        if Instant::now() > deadline {
            log::error!("Sequence did not finish within {budget:?}");
            return Err(OneWireError::Other(UartError::Timeout));
        }
        std::thread::sleep(Duration::from_micros(100));
    }
}

fn measure(bus: &mut Bus, group: &mut Ds1820Group<CAPACITY>, args: &Args) -> BusResult<()> {
    let budget = Duration::from_secs(1);
    if group.devices().is_empty() {
        let found = group.search_devices(bus, args.family)?;
        log::info!("Found {found} devices");
        if found == 0 {
            return Ok(());
        }
    }
    group.start_conversion(bus, RomCode::BROADCAST)?;
    pump(bus, group, budget)?;
    std::thread::sleep(Duration::from_millis(CONVERSION_TIME_MS.into()));

    let roms: Vec<RomCode> = group.devices().iter().copied().take(args.max_devices).collect();
    for rom in roms {
        group.start_temperature_read(bus, rom)?;
        pump(bus, group, budget)?;
        match group.temperature_result(rom) {
            Some(reading) if reading.valid => log::info!("ROM: {rom}, Temperature: {} C", reading.celsius()),
            Some(reading) => log::warn!("ROM: {rom}, Temperature: {} C (last good)", reading.celsius()),
            None => log::warn!("ROM: {rom}, no reading"),
        }
    }
    Ok(())
}

fn main() {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();
    // Open the serial port
    let line = TtyLine::open(&args.path).expect("Failed to open serial port");
    // Create the bus master
    let mut bus = UartOneWireBuilder::default()
        .with_timeout_us(args.timeout_us)
        .build(line, linux_embedded_hal::Delay)
        .expect("Failed to initialize the 1-Wire bus");
    let mut group = Ds1820Group::<CAPACITY>::default();
    loop {
        if let Err(e) = measure(&mut bus, &mut group, &args) {
            log::error!("Measurement failed: {e:?}");
            group.abort();
            bus.engine_mut().abort();
            if matches!(e, OneWireError::NoDevicePresent) {
                // sensors were unplugged, search again next time
                group = Ds1820Group::default();
            }
        }
        std::thread::sleep(Duration::from_millis(args.interval_ms));
    }
}
