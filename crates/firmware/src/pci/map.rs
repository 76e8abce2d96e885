use super::bar::set_bar_address;
use super::config::PciConfig;
use super::device::{DeviceId, PciDevices};
use super::region::{BarSlot, PciBusRegions, PciRegionType, RegionEntry};
use super::regs::*;
use super::PciBdf;

const PCI_IO_SHIFT: u32 = 8;
const PCI_MEMORY_SHIFT: u32 = 16;
const PCI_PREF_MEMORY_SHIFT: u32 = 16;

/// An address assignment made by the mapper.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MappedRegion {
    pub dev: DeviceId,
    pub bdf: PciBdf,
    pub slot: BarSlot,
    pub kind: PciRegionType,
    pub addr: u64,
    pub size: u64,
    pub is64: bool,
}

/// Programs one assignment: a device decoder, or the base/limit pair of a bridge window.
fn map_one_entry(cfg: &mut PciConfig<'_>, devices: &PciDevices, entry: &RegionEntry, addr: u64) {
    let dev = &devices[entry.dev];
    if entry.slot != BarSlot::BridgeWindow {
        tracing::debug!(
            bdf = %dev.bdf,
            slot = ?entry.slot,
            addr = format_args!("{addr:08x}"),
            size = format_args!("{:08x}", entry.size),
            kind = %entry.kind,
            "PCI: map device"
        );
        set_bar_address(cfg, dev, entry.slot, addr, entry.is64);
        return;
    }

    let bdf = dev.bdf;
    let limit = addr.wrapping_add(entry.size).wrapping_sub(1);
    match entry.kind {
        PciRegionType::Io => {
            cfg.write_u8(bdf, PCI_IO_BASE, (addr >> PCI_IO_SHIFT) as u8);
            cfg.write_u16(bdf, PCI_IO_BASE_UPPER16, 0);
            cfg.write_u8(bdf, PCI_IO_LIMIT, (limit >> PCI_IO_SHIFT) as u8);
            cfg.write_u16(bdf, PCI_IO_LIMIT_UPPER16, 0);
        }
        PciRegionType::Mem => {
            cfg.write_u16(bdf, PCI_MEMORY_BASE, (addr >> PCI_MEMORY_SHIFT) as u16);
            cfg.write_u16(bdf, PCI_MEMORY_LIMIT, (limit >> PCI_MEMORY_SHIFT) as u16);
        }
        PciRegionType::PrefMem => {
            cfg.write_u16(bdf, PCI_PREF_MEMORY_BASE, (addr >> PCI_PREF_MEMORY_SHIFT) as u16);
            cfg.write_u16(bdf, PCI_PREF_MEMORY_LIMIT, (limit >> PCI_PREF_MEMORY_SHIFT) as u16);
            cfg.write_u32(bdf, PCI_PREF_BASE_UPPER32, (addr >> 32) as u32);
            cfg.write_u32(bdf, PCI_PREF_LIMIT_UPPER32, (limit >> 32) as u32);
        }
    }
}

/// Hands out consecutive addresses from `base` to `entries` in ledger order. Bridge windows
/// seed the base of the matching ledger on their secondary bus.
pub(crate) fn map_entries(
    cfg: &mut PciConfig<'_>,
    devices: &PciDevices,
    busses: &mut [PciBusRegions],
    entries: Vec<RegionEntry>,
    mut base: u64,
    out: &mut Vec<MappedRegion>,
) -> u64 {
    for entry in entries {
        let addr = base;
        base = base.wrapping_add(entry.size);
        let dev = &devices[entry.dev];
        if entry.slot == BarSlot::BridgeWindow {
            if let Some(child) = busses.get_mut(usize::from(dev.secondary_bus)) {
                child.region_mut(entry.kind).base = addr;
            }
        }
        map_one_entry(cfg, devices, &entry, addr);
        out.push(MappedRegion {
            dev: entry.dev,
            bdf: dev.bdf,
            slot: entry.slot,
            kind: entry.kind,
            addr,
            size: entry.size,
            is64: entry.is64,
        });
    }
    base
}

/// Maps every bus ledger, parents first so bridge windows have seeded the child bases.
pub(crate) fn map_busses(
    cfg: &mut PciConfig<'_>,
    devices: &PciDevices,
    busses: &mut [PciBusRegions],
    out: &mut Vec<MappedRegion>,
) {
    for bus in 0..busses.len() {
        for kind in PciRegionType::ALL {
            let region = busses[bus].region_mut(kind);
            let entries = region.take_entries();
            let base = region.base;
            let end = map_entries(cfg, devices, busses, entries, base, out);
            busses[bus].region_mut(kind).base = end;
        }
    }
}
