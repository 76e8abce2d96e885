/// Address range type tags as reported through INT 15h E820.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum E820Type {
    Ram = 1,
    Reserved = 2,
    Acpi = 3,
    Nvs = 4,
    Unusable = 5,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct E820Entry {
    pub base: u64,
    pub length: u64,
    pub typ: E820Type,
}

impl E820Entry {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// Sink for address ranges the firmware withdraws from (or returns to) general use.
pub trait MemoryMap {
    fn add(&mut self, start: u64, size: u64, typ: E820Type);
}

/// Ordered, non-overlapping physical memory map.
///
/// Adding a range overrides whatever was previously recorded for those addresses; adjacent
/// ranges of the same type are merged.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct E820Map {
    entries: Vec<E820Entry>,
}

impl E820Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conservative map for a simple PC-compatible machine: low memory, the VGA hole and
    /// option ROM area, then RAM from 1MiB up to `ram_size` (plus anything above 4GiB).
    pub fn with_default_layout(ram_size: u64, ram_size_over_4g: u64) -> Self {
        let low_ram_end = 0x0009_FC00u64;
        let one_mb = 0x0010_0000u64;

        let mut map = Self::new();
        map.add(0, low_ram_end, E820Type::Ram);
        map.add(low_ram_end, one_mb - low_ram_end, E820Type::Reserved);
        if ram_size > one_mb {
            map.add(one_mb, ram_size - one_mb, E820Type::Ram);
        }
        if ram_size_over_4g != 0 {
            map.add(1 << 32, ram_size_over_4g, E820Type::Ram);
        }
        map
    }

    pub fn entries(&self) -> &[E820Entry] {
        &self.entries
    }

    /// Type recorded for `addr`, if any range covers it.
    pub fn lookup(&self, addr: u64) -> Option<E820Type> {
        self.entries
            .iter()
            .find(|e| e.base <= addr && addr < e.end())
            .map(|e| e.typ)
    }

    /// Drops `[start, start + size)` from the map, splitting ranges that straddle it.
    pub fn remove(&mut self, start: u64, size: u64) {
        let end = start.saturating_add(size);
        if end <= start {
            return;
        }

        let mut kept = Vec::with_capacity(self.entries.len() + 1);
        for e in self.entries.drain(..) {
            if e.end() <= start || e.base >= end {
                kept.push(e);
                continue;
            }
            if e.base < start {
                kept.push(E820Entry {
                    base: e.base,
                    length: start - e.base,
                    typ: e.typ,
                });
            }
            if e.end() > end {
                kept.push(E820Entry {
                    base: end,
                    length: e.end() - end,
                    typ: e.typ,
                });
            }
        }
        self.entries = kept;
    }

    fn insert_sorted(&mut self, entry: E820Entry) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.base > entry.base)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);

        // Merge with the following and preceding neighbours when they touch.
        if pos + 1 < self.entries.len() {
            let next = self.entries[pos + 1];
            if next.typ == entry.typ && entry.end() == next.base {
                self.entries[pos].length += next.length;
                self.entries.remove(pos + 1);
            }
        }
        if pos > 0 {
            let prev = self.entries[pos - 1];
            let cur = self.entries[pos];
            if prev.typ == cur.typ && prev.end() == cur.base {
                self.entries[pos - 1].length += cur.length;
                self.entries.remove(pos);
            }
        }
    }
}

impl MemoryMap for E820Map {
    fn add(&mut self, start: u64, size: u64, typ: E820Type) {
        if size == 0 {
            return;
        }
        let size = size.min(u64::MAX - start);
        tracing::debug!(
            start = format_args!("{start:#x}"),
            size = format_args!("{size:#x}"),
            ?typ,
            "e820 add"
        );
        self.remove(start, size);
        self.insert_sorted(E820Entry {
            base: start,
            length: size,
            typ,
        });
    }
}
