use crate::{
    OneWire, OneWireResult, OneWireStatus, RomCode, consts::ONEWIRE_CONDITIONAL_SEARCH_CMD,
    consts::ONEWIRE_SEARCH_CMD, error::OneWireError, utils::OneWireCrc,
};

/// Persistent state of the [1-Wire search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html).
///
/// The state survives between search passes: each pass resumes the binary tree
/// walk where the previous one branched off. It is a plain value, so it can be
/// stored by the owner of the bus and handed to a new [`OneWireSearch`] later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchState {
    family: u8,
    last_device: bool,
    last_discrepancy: u8,
    last_family_discrepancy: u8,
    rom: [u8; 8],
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchState {
    /// Creates an empty search state; the next pass finds the first device on the bus.
    pub const fn new() -> Self {
        Self {
            family: 0,
            last_device: false,
            last_discrepancy: 0,
            last_family_discrepancy: 0,
            rom: [0; 8],
        }
    }

    /// Creates a search state targeting a family code.
    ///
    /// The ROM accumulator is seeded with the family code and the last discrepancy
    /// is forced to bit 64, so the first pass follows the family code through every
    /// branch point. A `family` of `0` is the same as [`SearchState::new`].
    pub const fn first(family: u8) -> Self {
        let mut state = Self::new();
        if family != 0 {
            state.family = family;
            state.rom[0] = family;
            state.last_discrepancy = 64;
        }
        state
    }

    /// Creates a search state whose next pass follows `rom` through every branch point.
    pub const fn targeting(rom: RomCode) -> Self {
        let mut state = Self::new();
        state.rom = rom.to_bytes();
        state.last_discrepancy = 64;
        state
    }

    /// Rewinds the search so the next pass starts from the beginning again.
    pub fn reset(&mut self) {
        *self = Self::first(self.family);
    }

    /// Sets the search up to skip the family of the last device found.
    pub fn skip_family(&mut self) {
        self.last_discrepancy = self.last_family_discrepancy;
        self.last_family_discrepancy = 0;
        if self.last_discrepancy == 0 {
            self.last_device = true;
        }
    }

    /// Returns `true` once the last device has been reported.
    pub fn is_exhausted(&self) -> bool {
        self.last_device
    }

    /// Family code filter, `0` if every family is accepted.
    pub fn family(&self) -> u8 {
        self.family
    }

    /// Bit position (1-64) of the most recent branch where the 0 path was taken.
    pub fn last_discrepancy(&self) -> u8 {
        self.last_discrepancy
    }

    /// Bit position (1-8) of the most recent branch taken inside the family code.
    pub fn last_family_discrepancy(&self) -> u8 {
        self.last_family_discrepancy
    }

    /// Decides the direction at bit `id_bit_num` (1-64) and records it in the ROM accumulator.
    ///
    /// Returns `None` if neither a device with a 0 nor a 1 at this position answered.
    fn direction(&mut self, id_bit_num: u8, id_bit: bool, complement_bit: bool, last_zero: &mut u8) -> Option<bool> {
        if id_bit && complement_bit {
            return None;
        }
        let idx = usize::from((id_bit_num - 1) / 8);
        let mask = 1u8 << ((id_bit_num - 1) % 8);
        let dir = if id_bit != complement_bit {
            // All remaining devices agree on this bit
            id_bit
        } else {
            // Replay the previous choice before the last discrepancy, take the 1 branch on it
            let dir = if id_bit_num < self.last_discrepancy {
                self.rom[idx] & mask > 0
            } else {
                id_bit_num == self.last_discrepancy
            };
            if !dir {
                *last_zero = id_bit_num;
                if *last_zero < 9 {
                    self.last_family_discrepancy = *last_zero;
                }
            }
            dir
        };
        if dir {
            self.rom[idx] |= mask;
        } else {
            self.rom[idx] &= !mask;
        }
        Some(dir)
    }

    /// Concludes a search pass and updates the state for the next one.
    fn conclude(&mut self, pass: Option<SearchPass>) -> Option<RomCode> {
        let Some(pass) = pass else {
            log::debug!("Search pass aborted, no device answered");
            self.reset();
            return None;
        };
        if pass.crc.value() != 0 || self.rom[0] == 0 {
            log::warn!("Search pass produced {:02x?} with CRC mismatch", self.rom);
            self.reset();
            return None;
        }
        self.last_discrepancy = pass.last_zero;
        self.last_device = pass.last_zero == 0;
        if self.family != 0 && self.rom[0] != self.family {
            log::debug!("No more devices of family {:02x}", self.family);
            self.reset();
            return None;
        }
        Some(RomCode::from_bytes(self.rom))
    }
}

/// Bookkeeping of a single pass over the 64 ROM bits.
#[derive(Debug, Default)]
pub(crate) struct SearchPass {
    id_bit_num: u8,
    last_zero: u8,
    crc: OneWireCrc,
}

impl SearchPass {
    pub(crate) fn new() -> Self {
        Self {
            id_bit_num: 1,
            ..Default::default()
        }
    }

    /// Returns `true` while there are ROM bits left to resolve.
    pub(crate) fn pending(&self) -> bool {
        self.id_bit_num <= 64
    }

    /// Resolves one bit position; returns the direction to write back, or `None` to abort.
    pub(crate) fn step(&mut self, state: &mut SearchState, id_bit: bool, complement_bit: bool) -> Option<bool> {
        let dir = state.direction(self.id_bit_num, id_bit, complement_bit, &mut self.last_zero)?;
        if self.id_bit_num % 8 == 0 {
            self.crc.update(state.rom[usize::from(self.id_bit_num / 8 - 1)]);
        }
        self.id_bit_num += 1;
        Some(dir)
    }

    pub(crate) fn conclude(pass: Option<Self>, state: &mut SearchState) -> Option<RomCode> {
        state.conclude(pass)
    }
}

/// Classifies the outcome of the reset that opens a search pass.
///
/// `Ok(false)` means the bus is empty and the search should report no device.
pub(crate) fn check_presence<S: OneWireStatus, E>(status: OneWireResult<S, E>) -> OneWireResult<bool, E> {
    match status {
        Ok(status) if status.shortcircuit() => Err(OneWireError::ShortCircuit),
        Ok(status) => Ok(status.presence()),
        Err(OneWireError::NoDevicePresent) => Ok(false),
        Err(e) => Err(e),
    }
}

/// A structure for searching devices on a 1-Wire bus.
/// This structure implements the search algorithm for discovering devices on the 1-Wire bus.
/// It maintains the state of the search.
pub struct OneWireSearch<'a, T> {
    onewire: &'a mut T,
    cmd: u8,
    state: SearchState,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Type of search performed using [`OneWireSearch`] or [`OneWireSearchAsync`](crate::OneWireSearchAsync).
pub enum OneWireSearchKind {
    /// Normal search
    Normal = ONEWIRE_SEARCH_CMD,
    /// Search only for devices with alarm
    Alarmed = ONEWIRE_CONDITIONAL_SEARCH_CMD,
}

impl<'a, T> OneWireSearch<'a, T> {
    /// Creates a new [`OneWireSearch`] instance.
    ///
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `cmd` - The kind of search to perform.
    pub fn new(onewire: &'a mut T, cmd: OneWireSearchKind) -> Self {
        Self::with_state(onewire, cmd, SearchState::new())
    }

    /// Creates a new [`OneWireSearch`] instance with a specific family code.
    ///
    /// Only devices of this family are reported; the search ends with the last of them.
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `cmd` - The kind of search to perform.
    /// * `family` - The family code of the devices to search for.
    pub fn with_family(onewire: &'a mut T, cmd: OneWireSearchKind, family: u8) -> Self {
        Self::with_state(onewire, cmd, SearchState::first(family))
    }

    /// Resumes a search from a previously saved [`SearchState`].
    pub fn with_state(onewire: &'a mut T, cmd: OneWireSearchKind, state: SearchState) -> Self {
        Self {
            onewire,
            cmd: cmd as _,
            state,
        }
    }

    /// Current state of the search.
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Releases the bus and returns the search state.
    pub fn into_state(self) -> SearchState {
        self.state
    }

    /// Skips the remaining devices sharing the family code of the last device found.
    pub fn skip_family(&mut self) {
        self.state.skip_family();
    }
}

impl<T: OneWire> OneWireSearch<'_, T> {
    /// Restarts the search with a family code filter (`0` for all) and returns the first device.
    pub fn first(&mut self, family: u8) -> OneWireResult<Option<RomCode>, T::BusError> {
        self.state = SearchState::first(family);
        self.next()
    }

    /// Searches for devices on the 1-Wire bus.
    /// This method implements the [1-Wire search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html) to discover devices connected to the bus.
    /// The [next](OneWireSearch::next) method can be called repeatedly to find all devices on the bus.
    /// At the end of the search, calling this method will return `None` to indicate that no more devices are present,
    /// and the search state is rewound so the following call starts over.
    ///
    /// An empty bus, an aborted pass or a ROM code failing its CRC also yield `None`
    /// and rewind the search. Errors of the bus master rewind the search and are returned.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> OneWireResult<Option<RomCode>, T::BusError> {
        if self.state.last_device {
            self.state.reset();
            return Ok(None);
        }
        match self.pass() {
            Ok(pass) => Ok(SearchPass::conclude(pass, &mut self.state)),
            Err(e) => {
                self.state.reset();
                Err(e)
            }
        }
    }

    fn pass(&mut self) -> OneWireResult<Option<SearchPass>, T::BusError> {
        if !check_presence(self.onewire.reset())? {
            log::warn!("No presence pulse, search rewound");
            return Ok(None);
        }
        self.onewire.write_byte(self.cmd)?; // Search ROM command
        let mut pass = SearchPass::new();
        while pass.pending() {
            let id_bit = self.onewire.read_bit()?;
            let complement_bit = self.onewire.read_bit()?;
            let Some(dir) = pass.step(&mut self.state, id_bit, complement_bit) else {
                return Ok(None);
            };
            // Devices whose bit differs from the direction stop answering
            self.onewire.write_bit(dir)?;
        }
        Ok(Some(pass))
    }

    /// Verifies if the device with the given ROM code is present on the 1-Wire bus.
    ///
    /// This functions resets the search state, and calling [next](OneWireSearch::next) after this call will start a new search.
    pub fn verify(&mut self, rom: RomCode) -> OneWireResult<bool, T::BusError> {
        let family = self.state.family;
        self.state = SearchState::targeting(rom);
        let res = self.next();
        self.state = SearchState::first(family);
        Ok(res? == Some(rom))
    }
}
