//! Bridge capabilities that influence bus numbering and window sizing.

use super::config::PciConfig;
use super::regs::*;
use super::{PciBdf, PciRegionType};

/// Dword-aligned capabilities fit 48 times between the header and the end of config space.
const MAX_CAPABILITIES: usize = 48;

/// Locates the QEMU resource reserve vendor capability on a Red Hat PCI bridge or PCIe root
/// port. Returns the capability offset, or `0` when the bridge has none (or a truncated one).
pub(crate) fn find_resource_reserve_capability(cfg: &mut PciConfig<'_>, bdf: PciBdf) -> u8 {
    if cfg.read_u16(bdf, PCI_VENDOR_ID) != PCI_VENDOR_ID_REDHAT {
        tracing::trace!(bdf = %bdf, "PCI: non-QEMU bridge");
        return 0;
    }
    let device_id = cfg.read_u16(bdf, PCI_DEVICE_ID);
    if device_id != PCI_DEVICE_ID_REDHAT_ROOT_PORT && device_id != PCI_DEVICE_ID_REDHAT_BRIDGE {
        tracing::debug!(bdf = %bdf, "PCI: QEMU resource reserve cap device ID doesn't match");
        return 0;
    }

    let mut cap = 0;
    let mut found = 0;
    for _ in 0..MAX_CAPABILITIES {
        cap = cfg.find_capability(bdf, PCI_CAP_ID_VNDR, cap);
        if cap == 0 {
            break;
        }
        let cap_type = cfg.read_u8(bdf, cap.wrapping_add(REDHAT_CAP_TYPE_OFFSET));
        if cap_type == REDHAT_CAP_RESOURCE_RESERVE {
            found = cap;
            break;
        }
    }

    let cap = found;
    if cap == 0 {
        tracing::debug!(bdf = %bdf, "PCI: QEMU resource reserve cap not found");
        return 0;
    }
    let cap_len = cfg.read_u8(bdf, cap.wrapping_add(2));
    if cap_len < RES_RESERVE_CAP_SIZE {
        tracing::warn!(bdf = %bdf, cap_len, "PCI: QEMU resource reserve cap length is invalid");
        return 0;
    }
    cap
}

/// Reservation hints carried by the resource reserve capability. `None` means the field
/// holds the all-ones "unset" marker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResourceReserve {
    pub bus: Option<u32>,
    pub io: Option<u64>,
    pub mem: Option<u32>,
    pub pref32: Option<u32>,
    pub pref64: Option<u64>,
}

impl ResourceReserve {
    pub(crate) fn read(cfg: &mut PciConfig<'_>, bdf: PciBdf, cap: u8) -> Self {
        let mut read_u32 = |off: u8| {
            let v = cfg.read_u32(bdf, cap.wrapping_add(off));
            (v != u32::MAX).then_some(v)
        };
        let bus = read_u32(RES_RESERVE_BUS_RES);
        let mem = read_u32(RES_RESERVE_MEM);
        let pref32 = read_u32(RES_RESERVE_PREF_MEM_32);

        let mut read_u64 = |off: u8| {
            let lo = u64::from(cfg.read_u32(bdf, cap.wrapping_add(off)));
            let hi = u64::from(cfg.read_u32(bdf, cap.wrapping_add(off + 4)));
            let v = lo | hi << 32;
            (v != u64::MAX).then_some(v)
        };
        let io = read_u64(RES_RESERVE_IO);
        let pref64 = read_u64(RES_RESERVE_PREF_MEM_64);

        Self {
            bus,
            io,
            mem,
            pref32,
            pref64,
        }
    }

    /// Window size requested for `kind`, or 0 when nothing was requested.
    ///
    /// A prefetchable request is only honoured when exactly one of the 32-bit and 64-bit
    /// fields is set.
    pub fn size(&self, kind: PciRegionType, bdf: PciBdf) -> u64 {
        use PciRegionType::*;
        match kind {
            Io => self.io.unwrap_or(0),
            Mem => self.mem.map_or(0, u64::from),
            PrefMem => match (self.pref32, self.pref64) {
                (Some(v), None) => u64::from(v),
                (None, Some(v)) => v,
                (Some(_), Some(_)) => {
                    tracing::warn!(
                        bdf = %bdf,
                        "PCI: resource reserve cap PREF32 and PREF64 conflict"
                    );
                    0
                }
                (None, None) => 0,
            },
        }
    }
}

/// Whether the bridge behind `bdf` can have devices hot-plugged below it.
///
/// PCI Express ports qualify when they are root or downstream ports with a slot implemented;
/// conventional bridges when they carry a standard hot-plug controller capability.
pub(crate) fn bridge_hotplug_support(cfg: &mut PciConfig<'_>, bdf: PciBdf, pcie_cap: u8) -> bool {
    if pcie_cap != 0 {
        let flags = cfg.read_u16(bdf, pcie_cap.wrapping_add(PCI_EXP_FLAGS));
        let port_type = (flags & PCI_EXP_FLAGS_TYPE) >> 4;
        let downstream_port =
            port_type == PCI_EXP_TYPE_DOWNSTREAM || port_type == PCI_EXP_TYPE_ROOT_PORT;
        return downstream_port && flags & PCI_EXP_FLAGS_SLOT != 0;
    }
    cfg.find_capability(bdf, PCI_CAP_ID_SHPC, 0) != 0
}
