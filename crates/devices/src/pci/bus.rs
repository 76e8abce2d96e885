use std::collections::BTreeMap;

use crate::pci::{PciBdf, PciConfigSpace};

/// Handle of one physical bus segment. Segments are numbered by construction order; the bus
/// number a segment answers to is whatever the bridge above it has been programmed with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PciSegmentId(usize);

#[derive(Default)]
struct Segment {
    functions: BTreeMap<(u8, u8), PciConfigSpace>,
    /// Segment behind each bridge function of this segment.
    children: BTreeMap<(u8, u8), PciSegmentId>,
}

/// A PCI hierarchy with type 1 config cycle routing.
///
/// Root segments sit at fixed bus numbers. A config access to any other bus is forwarded
/// through the bridge whose secondary..=subordinate range claims it, exactly as the bridges'
/// bus number registers are programmed at the time of the access.
pub struct PciBus {
    segments: Vec<Segment>,
    roots: BTreeMap<u8, PciSegmentId>,
}

impl Default for PciBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PciBus {
    /// Hierarchy with an empty root bus 0.
    pub fn new() -> Self {
        let mut bus = Self {
            segments: Vec::new(),
            roots: BTreeMap::new(),
        };
        bus.add_root_bus(0);
        bus
    }

    pub fn root(&self) -> PciSegmentId {
        PciSegmentId(0)
    }

    /// Adds an extra host bridge whose root bus answers to `bus`.
    pub fn add_root_bus(&mut self, bus: u8) -> PciSegmentId {
        let id = PciSegmentId(self.segments.len());
        self.segments.push(Segment::default());
        let prev = self.roots.insert(bus, id);
        assert!(prev.is_none(), "duplicate PCI root bus {bus:#x}");
        id
    }

    pub fn add_function(
        &mut self,
        seg: PciSegmentId,
        device: u8,
        function: u8,
        cfg: PciConfigSpace,
    ) {
        assert!(device < 32 && function < 8);
        let prev = self.segments[seg.0].functions.insert((device, function), cfg);
        assert!(prev.is_none(), "duplicate PCI function {device:02x}.{function}");
    }

    /// Adds a bridge function and returns the segment behind it.
    pub fn add_bridge(
        &mut self,
        seg: PciSegmentId,
        device: u8,
        function: u8,
        cfg: PciConfigSpace,
    ) -> PciSegmentId {
        assert!(cfg.is_bridge(), "bridge function needs a type 1 header");
        self.add_function(seg, device, function, cfg);
        let child = PciSegmentId(self.segments.len());
        self.segments.push(Segment::default());
        self.segments[seg.0].children.insert((device, function), child);
        child
    }

    pub fn function(&self, seg: PciSegmentId, device: u8, function: u8) -> Option<&PciConfigSpace> {
        self.segments.get(seg.0)?.functions.get(&(device, function))
    }

    pub fn function_mut(
        &mut self,
        seg: PciSegmentId,
        device: u8,
        function: u8,
    ) -> Option<&mut PciConfigSpace> {
        self.segments.get_mut(seg.0)?.functions.get_mut(&(device, function))
    }

    /// Segment currently answering to bus number `bus`.
    pub fn route(&self, bus: u8) -> Option<PciSegmentId> {
        if let Some(&seg) = self.roots.get(&bus) {
            return Some(seg);
        }
        self.roots
            .values()
            .find_map(|&root| self.route_below(root, bus, 0))
    }

    fn route_below(&self, seg: PciSegmentId, bus: u8, depth: usize) -> Option<PciSegmentId> {
        // Misprogrammed bridges can form a cycle of bus ranges; a hierarchy can't be deeper
        // than the number of segments.
        if depth > self.segments.len() {
            return None;
        }
        let segment = &self.segments[seg.0];
        for (key, &child) in &segment.children {
            let cfg = &segment.functions[key];
            let (sec, sub) = (cfg.secondary_bus(), cfg.subordinate_bus());
            if sec == bus {
                return Some(child);
            }
            if sec < bus && bus <= sub {
                return self.route_below(child, bus, depth + 1);
            }
        }
        None
    }

    fn target_mut(&mut self, bdf: PciBdf) -> Option<&mut PciConfigSpace> {
        let seg = self.route(bdf.bus)?;
        self.function_mut(seg, bdf.device, bdf.function)
    }

    pub fn read_config(&mut self, bdf: PciBdf, offset: u16, size: u8) -> u32 {
        let Some(dev) = self.target_mut(bdf) else {
            // 0xFFFF_FFFF for non-existent device (common convention).
            return 0xFFFF_FFFF >> (32 - 8 * u32::from(size));
        };
        dev.read(offset, usize::from(size))
    }

    pub fn write_config(&mut self, bdf: PciBdf, offset: u16, size: u8, value: u32) {
        if let Some(dev) = self.target_mut(bdf) {
            dev.write(offset, usize::from(size), value);
        }
    }

    /// Functions in a stable order: segment construction order, then device/function.
    pub fn iter_functions(&self) -> impl Iterator<Item = (PciSegmentId, u8, u8, &PciConfigSpace)> {
        self.segments.iter().enumerate().flat_map(|(i, seg)| {
            seg.functions
                .iter()
                .map(move |(&(d, f), cfg)| (PciSegmentId(i), d, f, cfg))
        })
    }
}
