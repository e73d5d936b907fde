use crate::{
    OneWireAsync, OneWireResult, OneWireSearchKind, RomCode,
    search::{SearchPass, SearchState, check_presence},
};

/// A structure for asynchronous searching of devices on a 1-Wire bus.
/// This structure implements the search algorithm for discovering devices on the 1-Wire bus.
/// It maintains the state of the search.
pub struct OneWireSearchAsync<'a, T> {
    onewire: &'a mut T,
    cmd: u8,
    state: SearchState,
}

impl<T> core::fmt::Debug for OneWireSearchAsync<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OneWireSearchAsync")
            .field("cmd", &self.cmd)
            .field("state", &self.state)
            .finish()
    }
}

impl<'a, T> OneWireSearchAsync<'a, T> {
    /// Creates a new [OneWireSearchAsync] instance.
    ///
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWireAsync` trait.
    /// * `cmd` - The kind of search to perform.
    pub fn new(onewire: &'a mut T, cmd: OneWireSearchKind) -> Self {
        Self::with_state(onewire, cmd, SearchState::new())
    }

    /// Creates a new [`OneWireSearchAsync`] instance with a specific family code.
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWireAsync` trait.
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

    /// Skips the remaining devices sharing the family code of the last device found.
    pub fn skip_family(&mut self) {
        self.state.skip_family();
    }
}

impl<T: OneWireAsync> OneWireSearchAsync<'_, T> {
    /// Searches for devices on the 1-Wire bus.
    /// See [`OneWireSearch::next`](crate::OneWireSearch::next) for the semantics.
    #[allow(clippy::should_implement_trait)]
    pub async fn next(&mut self) -> OneWireResult<Option<RomCode>, T::BusError> {
        if self.state.is_exhausted() {
            self.state.reset();
            return Ok(None);
        }
        match self.pass().await {
            Ok(pass) => Ok(SearchPass::conclude(pass, &mut self.state)),
            Err(e) => {
                self.state.reset();
                Err(e)
            }
        }
    }

    async fn pass(&mut self) -> OneWireResult<Option<SearchPass>, T::BusError> {
        if !check_presence(self.onewire.reset().await)? {
            log::warn!("No presence pulse, search rewound");
            return Ok(None);
        }
        self.onewire.write_byte(self.cmd).await?; // Search ROM command
        let mut pass = SearchPass::new();
        while pass.pending() {
            let id_bit = self.onewire.read_bit().await?;
            let complement_bit = self.onewire.read_bit().await?;
            let Some(dir) = pass.step(&mut self.state, id_bit, complement_bit) else {
                return Ok(None);
            };
            self.onewire.write_bit(dir).await?;
        }
        Ok(Some(pass))
    }

    /// Verifies if the device with the given ROM code is present on the 1-Wire bus.
    ///
    /// This functions resets the search state, and calling [next](OneWireSearchAsync::next) after this call will start a new search.
    pub async fn verify(&mut self, rom: RomCode) -> OneWireResult<bool, T::BusError> {
        let family = self.state.family();
        self.state = SearchState::targeting(rom);
        let res = self.next().await;
        self.state = SearchState::first(family);
        Ok(res? == Some(rom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimDevice};
    use futures::executor::block_on;
    use std::vec::Vec;

    #[test]
    fn async_search_matches_blocking_search() {
        let roms: Vec<RomCode> = (1..=4u64)
            .map(|serial| RomCode::with_computed_crc(0x10, serial * 0x1111))
            .collect();
        let mut bus = SimBus::new(roms.iter().copied().map(SimDevice::new).collect());
        let mut blocking = Vec::new();
        let mut search = crate::OneWireSearch::new(&mut bus, OneWireSearchKind::Normal);
        while let Some(rom) = search.next().unwrap() {
            blocking.push(rom);
        }
        let mut search = OneWireSearchAsync::new(&mut bus, OneWireSearchKind::Normal);
        let found = block_on(async {
            let mut found = Vec::new();
            while let Some(rom) = search.next().await.unwrap() {
                found.push(rom);
            }
            found
        });
        assert_eq!(found.len(), roms.len());
        assert_eq!(found, blocking);
    }

    #[test]
    fn async_verify() {
        let rom = RomCode::with_computed_crc(0x10, 0x77);
        let mut bus = SimBus::new(std::vec![SimDevice::new(rom)]);
        let mut search = OneWireSearchAsync::with_family(&mut bus, OneWireSearchKind::Normal, 0x10);
        assert!(block_on(search.verify(rom)).unwrap());
        assert_eq!(search.state().family(), 0x10);
    }
}
