use core::ops::{Index, IndexMut};

use super::config::PciConfig;
use super::error::PciSetupError;
use super::regs::*;
use super::PciBdf;

/// Index of a device in [`PciDevices`], stable for the lifetime of the set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A discovered PCI function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PciDevice {
    pub bdf: PciBdf,
    /// Index of the root bus this function hangs off (0 for the primary root).
    pub rootbus: u8,
    /// Bridge whose secondary bus this function sits on; `None` on a root bus.
    pub parent: Option<DeviceId>,
    pub vendor: u16,
    pub device: u16,
    pub class: u16,
    pub prog_if: u8,
    pub revision: u8,
    pub header_type: u8,
    /// Secondary bus number for bridges (fixed up by bus numbering).
    pub secondary_bus: u8,
    /// Set once a driver has claimed the function.
    pub have_driver: bool,
}

impl PciDevice {
    pub fn is_bridge(&self) -> bool {
        let v = self.header_type & 0x7f;
        v == PCI_HEADER_TYPE_BRIDGE || v == PCI_HEADER_TYPE_CARDBUS
    }

    /// Enables bus mastering (DMA) and marks the function as claimed.
    pub fn enable_busmaster(&mut self, cfg: &mut PciConfig<'_>) {
        cfg.mask_u16(self.bdf, PCI_COMMAND, 0, PCI_COMMAND_MASTER);
        self.have_driver = true;
    }

    /// Validates the I/O BAR at config offset `addr`, enables I/O decoding and returns the
    /// port base.
    pub fn enable_iobar(&mut self, cfg: &mut PciConfig<'_>, addr: u8) -> Option<u16> {
        let bar = cfg.read_u32(self.bdf, addr);
        if bar & PCI_BASE_ADDRESS_SPACE_IO == 0 {
            tracing::warn!(bdf = %self.bdf, addr, "BAR is not an I/O BAR");
            return None;
        }
        let port = bar & PCI_BASE_ADDRESS_IO_MASK;
        if port == 0 || port > 0xffff {
            tracing::warn!(bdf = %self.bdf, port = format_args!("{port:#x}"), "invalid I/O BAR");
            return None;
        }
        cfg.mask_u16(self.bdf, PCI_COMMAND, 0, PCI_COMMAND_IO);
        self.have_driver = true;
        Some(port as u16)
    }

    /// Validates the memory BAR at config offset `addr`, enables memory decoding and returns
    /// its address.
    pub fn enable_membar(&mut self, cfg: &mut PciConfig<'_>, addr: u8) -> Option<u32> {
        let bar = cfg.read_u32(self.bdf, addr);
        if bar & PCI_BASE_ADDRESS_SPACE_IO != 0 {
            tracing::warn!(bdf = %self.bdf, addr, "BAR is not a memory BAR");
            return None;
        }
        if bar & PCI_BASE_ADDRESS_MEM_TYPE_64 != 0 && cfg.read_u32(self.bdf, addr + 4) != 0 {
            tracing::debug!(bdf = %self.bdf, "can not map memory bar over 4Gig");
            return None;
        }
        let base = bar & PCI_BASE_ADDRESS_MEM_MASK;
        // Rejects the first 16MiB and the last 4MiB below 4GiB.
        if base.wrapping_add(4 << 20) < 20 << 20 {
            tracing::warn!(bdf = %self.bdf, base = format_args!("{base:#x}"), "invalid memory BAR");
            return None;
        }
        cfg.mask_u16(self.bdf, PCI_COMMAND, 0, PCI_COMMAND_MEMORY);
        self.have_driver = true;
        Some(base)
    }
}

/// Every function found during discovery, in discovery order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PciDevices {
    list: Vec<PciDevice>,
    max_bus: u8,
}

impl PciDevices {
    #[cfg(test)]
    pub(crate) fn from_list(list: Vec<PciDevice>, max_bus: u8) -> Self {
        Self { list, max_bus }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Highest bus number seen during discovery.
    pub fn max_bus(&self) -> u8 {
        self.max_bus
    }

    pub fn iter(&self) -> impl Iterator<Item = &PciDevice> + '_ {
        self.list.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = DeviceId> {
        (0..self.list.len()).map(DeviceId)
    }

    pub fn get(&self, id: DeviceId) -> Option<&PciDevice> {
        self.list.get(id.0)
    }

    pub fn by_bdf(&self, bdf: PciBdf) -> Option<DeviceId> {
        self.list.iter().position(|d| d.bdf == bdf).map(DeviceId)
    }

    pub fn find_device(&self, vendor: u16, device: u16) -> Option<DeviceId> {
        self.list
            .iter()
            .position(|d| d.vendor == vendor && d.device == device)
            .map(DeviceId)
    }

    pub fn find_class(&self, class: u16) -> Option<DeviceId> {
        self.list.iter().position(|d| d.class == class).map(DeviceId)
    }

    /// Bridges above `id`, nearest first.
    pub fn ancestors(&self, id: DeviceId) -> impl Iterator<Item = DeviceId> + '_ {
        core::iter::successors(self[id].parent, move |p| self[*p].parent)
    }
}

impl Index<DeviceId> for PciDevices {
    type Output = PciDevice;

    fn index(&self, id: DeviceId) -> &PciDevice {
        &self.list[id.0]
    }
}

impl IndexMut<DeviceId> for PciDevices {
    fn index_mut(&mut self, id: DeviceId) -> &mut PciDevice {
        &mut self.list[id.0]
    }
}

/// Next present function on `bus` after `prev` (`None` starts at device 0).
///
/// Functions 1..=7 are only scanned when function 0 advertises multi-function; an absent
/// function 0 skips the whole device.
pub(crate) fn next_bdf(cfg: &mut PciConfig<'_>, prev: Option<PciBdf>, bus: u8) -> Option<PciBdf> {
    let mut bdf = match prev {
        None => u32::from(bus) << 8,
        Some(p) => {
            let single = p.function() == 0
                && cfg.read_u8(p, PCI_HEADER_TYPE) & PCI_HEADER_TYPE_MULTI_FUNCTION == 0;
            u32::from(p.0) + if single { 8 } else { 1 }
        }
    };

    loop {
        if bdf >> 8 != u32::from(bus) {
            return None;
        }
        let cur = PciBdf(bdf as u16);
        let vendor = cfg.read_u16(cur, PCI_VENDOR_ID);
        if vendor != 0x0000 && vendor != 0xffff {
            return Some(cur);
        }
        bdf += if cur.function() == 0 { 8 } else { 1 };
    }
}

/// Collects the present functions of `bus`.
pub(crate) fn bus_functions(cfg: &mut PciConfig<'_>, bus: u8) -> Vec<PciBdf> {
    let mut out = Vec::new();
    let mut cur = next_bdf(cfg, None, bus);
    while let Some(bdf) = cur {
        out.push(bdf);
        cur = next_bdf(cfg, Some(bdf), bus);
    }
    out
}

/// Scans buses `0..` until every secondary bus seen so far has been covered and
/// `extraroots` additional root buses have been found, recording every present function.
pub(crate) fn probe_devices(
    cfg: &mut PciConfig<'_>,
    extraroots: u64,
) -> Result<PciDevices, PciSetupError> {
    tracing::debug!("PCI probe");
    let mut list: Vec<PciDevice> = Vec::new();
    let mut max_bus = 0u8;
    let mut busdevs: [Option<DeviceId>; 256] = [None; 256];
    let mut lastbus = 0u8;
    let mut rootbuses = 0u8;

    let mut bus: i32 = -1;
    while bus < 0xff && (bus < i32::from(max_bus) || u64::from(rootbuses) < extraroots) {
        bus += 1;
        let busnr = bus as u8;
        let mut cur = next_bdf(cfg, None, busnr);
        while let Some(bdf) = cur {
            list.try_reserve(1)
                .map_err(|_| PciSetupError::NoMemory("pci device"))?;
            let id = DeviceId(list.len());

            let parent = busdevs[usize::from(busnr)];
            let rootbus = match parent {
                Some(p) => list[p.0].rootbus,
                None => {
                    if busnr != lastbus {
                        rootbuses = rootbuses.saturating_add(1);
                    }
                    lastbus = busnr;
                    max_bus = max_bus.max(busnr);
                    rootbuses
                }
            };

            let vendev = cfg.read_u32(bdf, PCI_VENDOR_ID);
            let classrev = cfg.read_u32(bdf, PCI_CLASS_REVISION);
            let mut dev = PciDevice {
                bdf,
                rootbus,
                parent,
                vendor: vendev as u16,
                device: (vendev >> 16) as u16,
                class: (classrev >> 16) as u16,
                prog_if: (classrev >> 8) as u8,
                revision: classrev as u8,
                header_type: cfg.read_u8(bdf, PCI_HEADER_TYPE),
                secondary_bus: 0,
                have_driver: false,
            };

            if dev.is_bridge() {
                let secbus = cfg.read_u8(bdf, PCI_SECONDARY_BUS);
                dev.secondary_bus = secbus;
                if secbus > busnr && busdevs[usize::from(secbus)].is_none() {
                    busdevs[usize::from(secbus)] = Some(id);
                }
                max_bus = max_bus.max(secbus);
            }

            tracing::debug!(
                bdf = %bdf,
                vendor = format_args!("{:04x}", dev.vendor),
                device = format_args!("{:04x}", dev.device),
                class = format_args!("{:04x}", dev.class),
                "PCI device"
            );
            list.push(dev);
            cur = next_bdf(cfg, Some(bdf), busnr);
        }
    }

    tracing::info!(
        count = list.len(),
        max_bus = format_args!("{max_bus:02x}"),
        "Found PCI devices"
    );
    Ok(PciDevices { list, max_bus })
}
