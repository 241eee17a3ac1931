use crate::{
    consts::{ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_SEARCH_CMD},
    crc::Crc8,
    error::{OwError, OwResult},
    rom::RomAddress,
    traits::{OneWireMaster, ResetStatus},
};

/// Position of the search on the ROM discriminator tree.
///
/// Carried between passes so one call returns one ROM. A cursor at its
/// default state starts the enumeration over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCursor {
    /// ROM found by the previous pass.
    pub last_rom: [u8; 8],
    /// Bit index (1..=64) of the last discrepancy taken as 0; 0 starts over.
    pub last_discrepancy: u8,
    /// Last discrepancy inside the family byte.
    pub last_family_discrepancy: u8,
    /// Set when the previous pass exhausted the tree.
    pub done: bool,
}

impl SearchCursor {
    /// Returns the cursor to the start of the enumeration.
    pub fn reset(&mut self) {
        *self = SearchCursor::default();
    }

    /// Positions the cursor so the next pass descends directly into the
    /// subtree of `family`.
    pub fn seed_family(&mut self, family: u8) {
        self.last_rom = [family, 0, 0, 0, 0, 0, 0, 0];
        self.last_discrepancy = 64;
        self.last_family_discrepancy = 0;
        self.done = false;
    }

    /// Positions the cursor so the next pass can only find `rom`.
    pub fn seed_rom(&mut self, rom: RomAddress) {
        self.last_rom = *rom.bytes();
        self.last_discrepancy = 64;
        self.last_family_discrepancy = 0;
        self.done = false;
    }

    /// Records the outcome of a completed pass.
    pub fn record(&mut self, rom: &[u8; 8], last_zero: u8) {
        self.last_rom = *rom;
        self.last_discrepancy = last_zero;
        self.done = last_zero == 0;
    }

    /// Bit `index` (0-based) of the previously found ROM.
    pub fn rom_bit(&self, index: u8) -> bool {
        self.last_rom[(index / 8) as usize] & (1 << (index % 8)) != 0
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Type of search performed by [`OneWireSearch`].
pub enum SearchKind {
    /// Visit every slave.
    Normal = ONEWIRE_SEARCH_CMD,
    /// Visit only slaves in alarm state.
    Alarmed = ONEWIRE_CONDITIONAL_SEARCH_CMD,
}

impl SearchKind {
    /// The ROM command byte starting a pass of this kind.
    pub fn command(self) -> u8 {
        self as u8
    }
}

/// Family-code admission filter applied after each successful pass.
///
/// An address is discarded when its family is excluded, or when an include
/// set exists and does not contain it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    include: Vec<u8>,
    exclude: Vec<u8>,
}

impl SearchFilter {
    /// Restricts enumeration to `family` (additive).
    pub fn target_family(&mut self, family: u8) {
        if !self.include.contains(&family) {
            self.include.push(family);
        }
    }

    /// Skips every slave of `family`.
    pub fn exclude_family(&mut self, family: u8) {
        if !self.exclude.contains(&family) {
            self.exclude.push(family);
        }
    }

    /// Clears both sets, admitting every family again.
    pub fn target_all(&mut self) {
        self.include.clear();
        self.exclude.clear();
    }

    /// Whether an address of `family` passes the filter.
    pub fn admits(&self, family: u8) -> bool {
        if self.exclude.contains(&family) {
            return false;
        }
        self.include.is_empty() || self.include.contains(&family)
    }

    /// The single targeted family, when the filter names exactly one.
    pub fn single_target(&self) -> Option<u8> {
        match self.include.as_slice() {
            [family] => Some(*family),
            _ => None,
        }
    }
}

/// A structure for searching devices on a 1-Wire bus.
///
/// Implements the ROM search algorithm for discovering devices over any
/// [`OneWireMaster`], maintaining the cursor between calls. Adapters with a
/// native triplet primitive are used as such; others fall back to two bit
/// reads and one bit write per ROM bit.
pub struct OneWireSearch<'a, T> {
    bus: &'a mut T,
    kind: SearchKind,
    cursor: SearchCursor,
    filter: SearchFilter,
    skip_reset: bool,
}

impl<'a, T> OneWireSearch<'a, T> {
    /// Creates a new [`OneWireSearch`] over `bus`.
    pub fn new(bus: &'a mut T, kind: SearchKind) -> Self {
        Self {
            bus,
            kind,
            cursor: SearchCursor::default(),
            filter: SearchFilter::default(),
            skip_reset: false,
        }
    }

    /// Creates a search restricted to one family code.
    ///
    /// The first pass descends directly into that family's subtree.
    pub fn with_family(bus: &'a mut T, kind: SearchKind, family: u8) -> Self {
        let mut filter = SearchFilter::default();
        filter.target_family(family);
        Self::with_filter(bus, kind, filter)
    }

    /// Creates a search with an arbitrary admission filter.
    pub fn with_filter(bus: &'a mut T, kind: SearchKind, filter: SearchFilter) -> Self {
        Self {
            bus,
            kind,
            cursor: SearchCursor::default(),
            filter,
            skip_reset: false,
        }
    }

    /// Skips the leading bus reset of each pass. Used on networks where a
    /// reset would disturb slaves behind open couplers.
    pub fn set_skip_reset(&mut self, skip: bool) {
        self.skip_reset = skip;
    }
}

impl<T: OneWireMaster> OneWireSearch<'_, T> {
    /// Searches for the next device on the 1-Wire bus.
    ///
    /// Repeated calls visit every admitted slave exactly once, then return
    /// `None`; the cursor restarts after that.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> OwResult<Option<RomAddress>> {
        if self.cursor == SearchCursor::default() {
            if let Some(family) = self.filter.single_target() {
                self.cursor.seed_family(family);
            }
        }
        loop {
            let Some(rom) = self.advance()? else {
                return Ok(None);
            };
            if self.filter.admits(rom.family()) {
                return Ok(Some(rom));
            }
            if self.cursor.done {
                self.cursor.reset();
                return Ok(None);
            }
        }
    }

    /// Verifies that the device with the given ROM is present on the bus.
    ///
    /// Runs one targeted pass seeded with `rom` and leaves the enumeration
    /// cursor untouched.
    pub fn verify(&mut self, rom: RomAddress) -> OwResult<bool> {
        let saved = self.cursor.clone();
        self.cursor.seed_rom(rom);
        let res = self.advance();
        self.cursor = saved;
        Ok(res? == Some(rom))
    }

    /// One pass of the discriminator-tree walk; returns one ROM or `None`
    /// when the tree is exhausted or the bus fell silent.
    fn advance(&mut self) -> OwResult<Option<RomAddress>> {
        if self.cursor.done {
            self.cursor.reset();
            return Ok(None);
        }
        if !self.skip_reset {
            match self.bus.reset()? {
                ResetStatus::Short => return Err(OwError::BusShort),
                ResetStatus::NoPresence => {
                    self.cursor.reset();
                    return Ok(None);
                }
                ResetStatus::Presence | ResetStatus::Alarm => {}
            }
        }
        self.bus.write_byte(self.kind.command())?;

        let mut rom = [0u8; 8];
        let mut last_zero: u8 = 0;
        for bit in 1..=64u8 {
            let index = bit - 1;
            // Direction to take if this bit turns out to be a discrepancy.
            let guess = if bit < self.cursor.last_discrepancy {
                self.cursor.rom_bit(index)
            } else {
                bit == self.cursor.last_discrepancy
            };
            let (id_bit, cmp_bit, taken) = match self.bus.read_triplet(guess) {
                Ok(triplet) => triplet,
                Err(OwError::NotSupported(_)) => {
                    let id_bit = self.bus.read_bit()?;
                    let cmp_bit = self.bus.read_bit()?;
                    let taken = if id_bit != cmp_bit { id_bit } else { guess };
                    if !(id_bit && cmp_bit) {
                        self.bus.write_bit(taken)?;
                    }
                    (id_bit, cmp_bit, taken)
                }
                Err(e) => return Err(e),
            };
            if id_bit && cmp_bit {
                // No slave answered the time slots.
                self.cursor.reset();
                return Ok(None);
            }
            if !id_bit && !cmp_bit && !taken {
                last_zero = bit;
                if bit < 9 {
                    self.cursor.last_family_discrepancy = bit;
                }
            }
            if taken {
                rom[(index / 8) as usize] |= 1 << (index % 8);
            }
        }

        if rom[0] == 0 {
            self.cursor.reset();
            return Ok(None);
        }
        if !Crc8::validate(&rom) {
            log::warn!("search pass produced a rom with bad crc, treating as no device");
            self.cursor.reset();
            return Ok(None);
        }
        self.cursor.record(&rom, last_zero);
        RomAddress::from_bytes(rom).map(Some)
    }
}

#[cfg(test)]
mod test {
    use super::{OneWireSearch, SearchFilter, SearchKind};
    use crate::{
        error::OwResult,
        rom::RomAddress,
        traits::{OneWireMaster, ResetStatus, Speed},
    };

    /// Bit-level bus model: slaves answer search time slots with the
    /// wired-AND of their outputs and drop out when the written direction
    /// disagrees with their ROM bit.
    struct TestBus {
        devices: Vec<([u8; 8], bool)>,
        participants: Vec<usize>,
        bit_index: u8,
        reads_done: u8,
        alarm_only: bool,
    }

    impl TestBus {
        fn new(devices: Vec<([u8; 8], bool)>) -> Self {
            Self {
                devices,
                participants: Vec::new(),
                bit_index: 0,
                reads_done: 0,
                alarm_only: false,
            }
        }

        fn device_bit(&self, device: usize, index: u8) -> bool {
            self.devices[device].0[(index / 8) as usize] & (1 << (index % 8)) != 0
        }
    }

    impl OneWireMaster for TestBus {
        fn reset(&mut self) -> OwResult<ResetStatus> {
            self.participants.clear();
            if self.devices.is_empty() {
                Ok(ResetStatus::NoPresence)
            } else if self.devices.iter().any(|(_, alarming)| *alarming) {
                Ok(ResetStatus::Alarm)
            } else {
                Ok(ResetStatus::Presence)
            }
        }

        fn write_byte(&mut self, byte: u8) -> OwResult<()> {
            if byte == SearchKind::Normal.command() || byte == SearchKind::Alarmed.command() {
                self.alarm_only = byte == SearchKind::Alarmed.command();
                self.participants = self
                    .devices
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, alarming))| !self.alarm_only || *alarming)
                    .map(|(i, _)| i)
                    .collect();
                self.bit_index = 0;
                self.reads_done = 0;
            }
            Ok(())
        }

        fn read_bit(&mut self) -> OwResult<bool> {
            let complement = self.reads_done == 1;
            self.reads_done += 1;
            Ok(self
                .participants
                .iter()
                .all(|&d| self.device_bit(d, self.bit_index) != complement))
        }

        fn write_bit(&mut self, bit: bool) -> OwResult<()> {
            let index = self.bit_index;
            let devices = &self.devices;
            self.participants
                .retain(|&d| (devices[d].0[(index / 8) as usize] & (1 << (index % 8)) != 0) == bit);
            self.bit_index += 1;
            self.reads_done = 0;
            Ok(())
        }

        fn read_byte(&mut self) -> OwResult<u8> {
            Ok(0xff)
        }

        fn block(&mut self, _buf: &mut [u8]) -> OwResult<()> {
            Ok(())
        }

        fn speed(&self) -> Speed {
            Speed::Regular
        }

        fn set_speed(&mut self, _speed: Speed) -> OwResult<()> {
            Ok(())
        }
    }

    fn rom(family: u8, serial: [u8; 6]) -> [u8; 8] {
        let mut bytes = [family, serial[0], serial[1], serial[2], serial[3], serial[4], serial[5], 0];
        let mut crc = crate::crc::Crc8::default();
        crc.update_bytes(&bytes[..7]);
        bytes[7] = crc.value();
        bytes
    }

    #[test]
    fn empty_bus_finds_nothing() {
        let mut bus = TestBus::new(vec![]);
        let mut search = OneWireSearch::new(&mut bus, SearchKind::Normal);
        assert_eq!(search.next().unwrap(), None);
    }

    #[test]
    fn visits_every_device_exactly_once() {
        let roms = vec![
            rom(0x10, [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0x00]),
            rom(0x28, [0xf1, 0xe2, 0xd3, 0xc4, 0xb5, 0xa6]),
            rom(0x28, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]),
            rom(0x1f, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
        ];
        let mut bus = TestBus::new(roms.iter().map(|r| (*r, false)).collect());
        let mut search = OneWireSearch::new(&mut bus, SearchKind::Normal);
        let mut found = Vec::new();
        while let Some(r) = search.next().unwrap() {
            found.push(*r.bytes());
        }
        assert_eq!(found.len(), roms.len());
        for r in &roms {
            assert_eq!(found.iter().filter(|f| *f == r).count(), 1);
        }
    }

    #[test]
    fn include_filter_returns_exactly_that_family() {
        let roms = vec![
            rom(0x10, [1, 0, 0, 0, 0, 0]),
            rom(0x28, [2, 0, 0, 0, 0, 0]),
            rom(0x28, [3, 0, 0, 0, 0, 0]),
        ];
        let mut bus = TestBus::new(roms.iter().map(|r| (*r, false)).collect());
        let mut search = OneWireSearch::with_family(&mut bus, SearchKind::Normal, 0x28);
        let mut found = Vec::new();
        while let Some(r) = search.next().unwrap() {
            assert_eq!(r.family(), 0x28);
            found.push(r);
        }
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn exclude_filter_drops_family() {
        let roms = vec![rom(0x10, [1, 0, 0, 0, 0, 0]), rom(0x28, [2, 0, 0, 0, 0, 0])];
        let mut bus = TestBus::new(roms.iter().map(|r| (*r, false)).collect());
        let mut filter = SearchFilter::default();
        filter.exclude_family(0x10);
        let mut search = OneWireSearch::with_filter(&mut bus, SearchKind::Normal, filter);
        let mut found = Vec::new();
        while let Some(r) = search.next().unwrap() {
            found.push(r);
        }
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].family(), 0x28);
    }

    #[test]
    fn alarm_search_visits_only_alarming() {
        let quiet = rom(0x10, [1, 0, 0, 0, 0, 0]);
        let loud = rom(0x28, [2, 0, 0, 0, 0, 0]);
        let mut bus = TestBus::new(vec![(quiet, false), (loud, true)]);
        let mut search = OneWireSearch::new(&mut bus, SearchKind::Alarmed);
        let first = search.next().unwrap().unwrap();
        assert_eq!(*first.bytes(), loud);
        assert_eq!(search.next().unwrap(), None);
    }

    #[test]
    fn verify_finds_present_and_misses_absent() {
        let present = rom(0x10, [1, 0, 0, 0, 0, 0]);
        let absent = rom(0x10, [9, 9, 9, 0, 0, 0]);
        let mut bus = TestBus::new(vec![(present, false)]);
        let mut search = OneWireSearch::new(&mut bus, SearchKind::Normal);
        assert!(search.verify(RomAddress::from_bytes(present).unwrap()).unwrap());
        assert!(!search.verify(RomAddress::from_bytes(absent).unwrap()).unwrap());
    }
}
