#![no_std]
#![deny(missing_docs)]
//! # embedded-onewire
//! A no-std implementation of the 1-Wire protocol layer.
//!
//! This crate provides a trait-based interface for 1-Wire communication, allowing you to implement the protocol on various platforms.
//! [OneWire] trait defines the basic blocking operations required for 1-Wire communication, such as resetting the bus, writing and reading bytes, and writing and reading bits.
//! It also includes an asynchronous version of the trait, [OneWireAsync], for use in async environments,
//! and [OneWireTransfer], a completion-driven interface for masters whose time slots finish in an interrupt.
//!
//! The crate also provides a search algorithm for discovering devices on the 1-Wire bus, implemented in the [OneWireSearch] and [OneWireSearchAsync] structs,
//! and the [RomMatch] sequencer which addresses a device over a [OneWireTransfer] bus one transfer at a time.
//!
//! The `sim` feature adds a bit-level model of the bus and its devices for testing drivers without hardware.

#[cfg(any(test, feature = "sim"))]
extern crate std;

mod address;
pub mod consts;
mod error;
mod rom_match;
mod search;
mod search_async;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod traits;
mod traits_async;
mod transfer;
mod utils;
pub use address::RomCode;
pub use consts::*;
pub use error::OneWireError;
pub use rom_match::{MatchOutcome, MatchProgress, RomMatch};
pub use search::{OneWireSearch, OneWireSearchKind, SearchState};
pub use search_async::OneWireSearchAsync;
pub use traits::{OneWire, OneWireStatus};
pub use traits_async::OneWireAsync;
pub use transfer::{OneWireTransfer, PullUp, TransferDone};
pub use utils::OneWireCrc;

/// Error type for 1-Wire operations.
pub type OneWireResult<T, E> = Result<T, OneWireError<E>>;
