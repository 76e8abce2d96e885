use core::fmt;

use super::device::DeviceId;
use super::error::PciSetupError;

/// Address space class of an allocation request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PciRegionType {
    Io,
    Mem,
    PrefMem,
}

impl PciRegionType {
    /// Allocation and mapping order.
    pub const ALL: [PciRegionType; 3] = [Self::Io, Self::Mem, Self::PrefMem];

    pub const fn index(self) -> usize {
        match self {
            Self::Io => 0,
            Self::Mem => 1,
            Self::PrefMem => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Mem => "mem",
            Self::PrefMem => "prefmem",
        }
    }
}

impl fmt::Display for PciRegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which decoder of the owning device an entry stands for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BarSlot {
    /// Standard BAR `0..=5`.
    Bar(u8),
    /// Expansion ROM decoder.
    Rom,
    /// The forwarding window of a bridge towards its secondary bus.
    BridgeWindow,
}

/// One allocation request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegionEntry {
    pub dev: DeviceId,
    pub slot: BarSlot,
    pub size: u64,
    pub align: u64,
    pub is64: bool,
    pub kind: PciRegionType,
}

/// Allocation requests of one bus for one address space class, ordered by descending
/// alignment and then descending size.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Region {
    /// Start of the window; only meaningful once the root allocator or the parent's
    /// mapping pass has set it.
    pub base: u64,
    entries: Vec<RegionEntry>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[RegionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `entry` in front of the first entry with a smaller alignment (or the same
    /// alignment and a smaller size). Equal keys keep insertion order.
    pub fn insert(&mut self, entry: RegionEntry) -> Result<(), PciSetupError> {
        self.entries
            .try_reserve(1)
            .map_err(|_| PciSetupError::NoMemory("region entry"))?;
        let pos = self
            .entries
            .iter()
            .position(|e| e.align < entry.align || (e.align == entry.align && e.size < entry.size))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
        Ok(())
    }

    pub fn sum(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, e| acc.wrapping_add(e.size))
    }

    /// Largest alignment requested, `1` when there are no entries.
    pub fn align(&self) -> u64 {
        self.entries.first().map_or(1, |e| e.align)
    }

    /// Moves every 64-bit capable entry for which `movable` holds to the end of `to`,
    /// keeping their relative order. Returns how many were moved.
    pub fn migrate_64bit_entries(
        &mut self,
        to: &mut Region,
        movable: impl Fn(&RegionEntry) -> bool,
    ) -> Result<usize, PciSetupError> {
        let (moved, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.is64 && movable(e));
        self.entries = kept;
        to.entries
            .try_reserve(moved.len())
            .map_err(|_| PciSetupError::NoMemory("region entry"))?;
        let count = moved.len();
        to.entries.extend(moved);
        Ok(count)
    }

    /// Empties the ledger, handing the entries over in allocation order.
    pub fn take_entries(&mut self) -> Vec<RegionEntry> {
        core::mem::take(&mut self.entries)
    }
}

/// Per-bus working state: one ledger per address space class and the bridge whose secondary
/// side this bus is. Root buses have no bridge and share slot 0.
#[derive(Clone, Debug, Default)]
pub(crate) struct PciBusRegions {
    pub r: [Region; 3],
    pub bus_dev: Option<DeviceId>,
}

impl PciBusRegions {
    pub fn region(&self, kind: PciRegionType) -> &Region {
        &self.r[kind.index()]
    }

    pub fn region_mut(&mut self, kind: PciRegionType) -> &mut Region {
        &mut self.r[kind.index()]
    }
}
