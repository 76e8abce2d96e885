//! Root window placement.
//!
//! I/O space layout the root allocator has to respect:
//!
//! ```text
//!   0000 - 0fff    legacy ISA, PCI config ports
//!   1000 - 9fff    free
//!   a000 - afff    ACPI hotplug (i440FX/PIIX only)
//!   b000 - bfff    power management
//!   c000 - ffff    free, traditional PCI I/O
//! ```

use super::device::PciDevices;
use super::error::PciSetupError;
use super::region::{PciBusRegions, PciRegionType, Region, RegionEntry};
use super::regs::PCI_CLASS_SERIAL_USB;
use super::{align_down, align_up};

const ONE_GIB: u64 = 1 << 30;

/// Half-open address range `[start, end)`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PciWindow {
    pub start: u64,
    pub end: u64,
}

impl PciWindow {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, addr: u64, size: u64) -> bool {
        addr >= self.start && addr.saturating_add(size) <= self.end
    }
}

/// Root allocation outcome: windows plus the requests moved above 4GiB, in the order they
/// have to be mapped (plain memory, then prefetchable).
#[derive(Debug, Default)]
pub(crate) struct RootAllocation {
    pub io: PciWindow,
    pub mem64: Option<(PciWindow, [Region; 2])>,
}

/// Places the root I/O window at one of the legacy-compatible bases.
pub(crate) fn init_root_regions_io(
    r_io: &mut Region,
    io_low_end: u64,
) -> Result<PciWindow, PciSetupError> {
    let sum = r_io.sum();
    r_io.base = if sum < 0x4000 {
        // Traditional region is big enough.
        0xc000
    } else if sum < io_low_end.saturating_sub(0x1000) {
        0x1000
    } else {
        tracing::error!(demand = format_args!("{sum:#x}"), "PCI: out of I/O address space");
        return Err(PciSetupError::OutOfIoSpace { demand: sum });
    };
    let window = PciWindow {
        start: r_io.base,
        end: r_io.base + sum,
    };
    tracing::info!(
        "PCI: IO: {:4x} - {:4x}",
        window.start,
        window.end.wrapping_sub(1)
    );
    Ok(window)
}

/// Places the plain and prefetchable root windows right below `pcimem_end`. The window with
/// the smaller alignment goes on top. Returns `false` when the lower one ends up outside
/// `[pcimem_start, pcimem_end]`.
pub(crate) fn init_root_regions_mem(
    root: &mut PciBusRegions,
    pcimem_start: u64,
    pcimem_end: u64,
) -> bool {
    let (start_kind, end_kind) =
        if root.region(PciRegionType::Mem).align() < root.region(PciRegionType::PrefMem).align() {
            (PciRegionType::PrefMem, PciRegionType::Mem)
        } else {
            (PciRegionType::Mem, PciRegionType::PrefMem)
        };

    let r_end = root.region_mut(end_kind);
    r_end.base = align_down(pcimem_end.wrapping_sub(r_end.sum()), r_end.align());
    let top = r_end.base;

    let r_start = root.region_mut(start_kind);
    r_start.base = align_down(top.wrapping_sub(r_start.sum()), r_start.align());

    r_start.base >= pcimem_start && r_start.base <= pcimem_end
}

/// Chooses all root windows. When the 32-bit window is too small, every 64-bit capable
/// request except USB controllers is moved into a window above RAM and the 32-bit placement
/// is retried once.
pub(crate) fn allocate_root(
    root: &mut PciBusRegions,
    devices: &PciDevices,
    io_low_end: u64,
    pcimem_start: u64,
    pcimem_end: u64,
    mem64_floor: u64,
) -> Result<RootAllocation, PciSetupError> {
    let io = init_root_regions_io(root.region_mut(PciRegionType::Io), io_low_end)?;
    tracing::info!("PCI: 32: {pcimem_start:016x} - {pcimem_end:016x}");

    if init_root_regions_mem(root, pcimem_start, pcimem_end) {
        return Ok(RootAllocation { io, mem64: None });
    }

    let movable = |e: &RegionEntry| devices[e.dev].class != PCI_CLASS_SERIAL_USB;
    let mut r64_mem = Region::new();
    let mut r64_pref = Region::new();
    root.region_mut(PciRegionType::Mem)
        .migrate_64bit_entries(&mut r64_mem, movable)?;
    root.region_mut(PciRegionType::PrefMem)
        .migrate_64bit_entries(&mut r64_pref, movable)?;

    if !init_root_regions_mem(root, pcimem_start, pcimem_end) {
        tracing::error!("PCI: out of 32bit address space");
        return Err(PciSetupError::OutOf32BitSpace {
            start: pcimem_start,
            end: pcimem_end,
        });
    }

    r64_mem.base = align_up(align_up(mem64_floor, r64_mem.align()), ONE_GIB);
    r64_pref.base = align_up(
        align_up(r64_mem.base + r64_mem.sum(), r64_pref.align()),
        ONE_GIB,
    );
    let window = PciWindow {
        start: r64_mem.base,
        end: align_up(r64_pref.base + r64_pref.sum(), ONE_GIB),
    };
    tracing::info!("PCI: 64: {:016x} - {:016x}", window.start, window.end);

    Ok(RootAllocation {
        io,
        mem64: Some((window, [r64_mem, r64_pref])),
    })
}
