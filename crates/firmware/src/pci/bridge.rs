//! Requirement scan and bottom-up folding of child bus demand into bridge windows.

use super::bar::{probe_bar, PCI_BRIDGE_NUM_BARS, PCI_NUM_BARS};
use super::capability::{
    bridge_hotplug_support, find_resource_reserve_capability, ResourceReserve,
};
use super::config::PciConfig;
use super::device::PciDevices;
use super::error::PciSetupError;
use super::region::{BarSlot, PciBusRegions, PciRegionType, Region, RegionEntry};
use super::regs::*;
use super::{align_up, PciBdf};

/// Smallest allocation handed to a memory BAR (one page).
pub const PCI_DEVICE_MEM_MIN: u64 = 1 << 12;
/// Bridge memory window granularity (one 2MiB huge page).
pub const PCI_BRIDGE_MEM_MIN: u64 = 1 << 21;
/// Bridge I/O window granularity mandated by the bridge architecture.
pub const PCI_BRIDGE_IO_MIN: u64 = 0x1000;

/// Bus whose ledgers receive entries for devices on `bus`: root buses all share slot 0.
fn ledger_bus(busses: &[PciBusRegions], bus: u8) -> usize {
    let idx = usize::from(bus);
    match busses.get(idx) {
        Some(b) if b.bus_dev.is_some() => idx,
        _ => 0,
    }
}

/// Sizes every decoder of every device and files the requests into the ledger of the bus the
/// device sits on.
pub(crate) fn collect_bar_requirements(
    cfg: &mut PciConfig<'_>,
    devices: &PciDevices,
    busses: &mut [PciBusRegions],
) -> Result<(), PciSetupError> {
    for id in devices.ids() {
        let dev = &devices[id];
        if dev.class == PCI_CLASS_BRIDGE_PCI {
            if let Some(b) = busses.get_mut(usize::from(dev.secondary_bus)) {
                b.bus_dev = Some(id);
            }
        }
        let bus = ledger_bus(busses, dev.bdf.bus());

        // Slots 0..=5 are BARs, slot 6 is the expansion ROM.
        let mut i = 0u8;
        while i <= PCI_NUM_BARS {
            if dev.class == PCI_CLASS_BRIDGE_PCI && (PCI_BRIDGE_NUM_BARS..PCI_NUM_BARS).contains(&i)
            {
                i += 1;
                continue;
            }
            let slot = if i == PCI_NUM_BARS {
                BarSlot::Rom
            } else {
                BarSlot::Bar(i)
            };
            let probe = probe_bar(cfg, dev, slot);
            if probe.size != 0 {
                let mut size = probe.size;
                if probe.kind != PciRegionType::Io && size < PCI_DEVICE_MEM_MIN {
                    size = PCI_DEVICE_MEM_MIN;
                }
                tracing::debug!(
                    bdf = %dev.bdf,
                    slot = ?slot,
                    size = format_args!("{size:#x}"),
                    kind = %probe.kind,
                    is64 = probe.is64,
                    "PCI: bar"
                );
                busses[bus].region_mut(probe.kind).insert(RegionEntry {
                    dev: id,
                    slot,
                    size,
                    align: size,
                    is64: probe.is64,
                    kind: probe.kind,
                })?;
                if probe.is64 {
                    i += 1;
                }
            }
            i += 1;
        }
    }
    Ok(())
}

/// Probes whether a bridge forwards `kind` by writing the base register and checking that it
/// sticks. Plain memory forwarding is mandatory. Leaves the probed window closed.
fn bridge_has_region(cfg: &mut PciConfig<'_>, bdf: PciBdf, kind: PciRegionType) -> bool {
    let base = match kind {
        PciRegionType::Io => PCI_IO_BASE,
        PciRegionType::PrefMem => PCI_PREF_MEMORY_BASE,
        PciRegionType::Mem => return true,
    };
    cfg.write_u8(bdf, base, 0xff);
    cfg.read_u8(bdf, base) != 0
}

/// Discards the `kind` requests of `bus` and of every bus behind bridge windows among them.
fn drop_subtree(
    devices: &PciDevices,
    busses: &mut [PciBusRegions],
    bus: usize,
    kind: PciRegionType,
) -> usize {
    let mut pending = vec![bus];
    let mut count = 0;
    while let Some(bus) = pending.pop() {
        let Some(b) = busses.get_mut(bus) else {
            continue;
        };
        for e in b.region_mut(kind).take_entries() {
            count += 1;
            if e.slot == BarSlot::BridgeWindow {
                pending.push(usize::from(devices[e.dev].secondary_bus));
            }
        }
    }
    count
}

/// A bridge window may sit above 4GiB only for prefetchable memory, only when the bridge
/// implements 64-bit prefetchable decoding, and only when every request below it is
/// 64-bit capable.
fn bridge_region_is64(
    cfg: &mut PciConfig<'_>,
    children: &Region,
    bdf: PciBdf,
    kind: PciRegionType,
) -> bool {
    if kind != PciRegionType::PrefMem {
        return false;
    }
    let mut pmem = cfg.read_u32(bdf, PCI_PREF_MEMORY_BASE);
    if pmem == 0 {
        cfg.write_u32(bdf, PCI_PREF_MEMORY_BASE, 0xfff0_fff0);
        pmem = cfg.read_u32(bdf, PCI_PREF_MEMORY_BASE);
        cfg.write_u32(bdf, PCI_PREF_MEMORY_BASE, 0);
    }
    if pmem & PCI_PREF_RANGE_TYPE_MASK != PCI_PREF_RANGE_TYPE_64 {
        return false;
    }
    children.entries().iter().all(|e| e.is64)
}

/// Walks the bus tree from the highest secondary bus down, turning each bridge's child
/// demand into one window request on its parent bus.
pub(crate) fn propagate_bridge_windows(
    cfg: &mut PciConfig<'_>,
    devices: &PciDevices,
    busses: &mut [PciBusRegions],
) -> Result<(), PciSetupError> {
    for secondary in (1..busses.len()).rev() {
        let Some(bridge) = busses[secondary].bus_dev else {
            continue;
        };
        let bdf = devices[bridge].bdf;
        let parent = ledger_bus(busses, bdf.bus());

        let pcie_cap = cfg.find_capability(bdf, PCI_CAP_ID_EXP, 0);
        let reserve = match find_resource_reserve_capability(cfg, bdf) {
            0 => None,
            cap => Some(ResourceReserve::read(cfg, bdf, cap)),
        };
        let hotplug = bridge_hotplug_support(cfg, bdf, pcie_cap);

        for kind in PciRegionType::ALL {
            if !bridge_has_region(cfg, bdf, kind) {
                let dropped = drop_subtree(devices, busses, secondary, kind);
                if dropped != 0 {
                    tracing::warn!(
                        bdf = %bdf,
                        kind = %kind,
                        count = dropped,
                        "PCI: bridge does not forward {kind}, devices behind it stay unmapped"
                    );
                }
                continue;
            }
            let children = busses[secondary].region(kind);

            let mut align = match kind {
                PciRegionType::Io => PCI_BRIDGE_IO_MIN,
                _ => PCI_BRIDGE_MEM_MIN,
            };
            align = align.max(children.align());

            let mut size = reserve.map_or(0, |r| r.size(kind, bdf));
            let mut sum = children.sum();
            let resource_optional = pcie_cap != 0 && kind == PciRegionType::Io;
            if sum == 0 && hotplug && !resource_optional {
                // Reserve a minimal window for devices plugged in later.
                sum = align;
            }
            if size > sum {
                tracing::debug!(
                    bdf = %bdf,
                    size = format_args!("{size:#x}"),
                    kind = %kind,
                    "PCI: QEMU resource reserve cap"
                );
                if kind != PciRegionType::Io {
                    size = align_up(size, align);
                }
            } else {
                size = align_up(sum, align);
            }

            let is64 = bridge_region_is64(cfg, children, bdf, kind);
            busses[parent].region_mut(kind).insert(RegionEntry {
                dev: bridge,
                slot: BarSlot::BridgeWindow,
                size,
                align,
                is64,
                kind,
            })?;
            tracing::debug!(
                secondary_bus = secondary,
                size = format_args!("{size:08x}"),
                kind = %kind,
                is64,
                "PCI: bridge window"
            );
        }
    }
    Ok(())
}
