use vbios_pc_constants::{PCIE_MMCONFIG_BUS_STRIDE, PCIE_MMCONFIG_SIZE};

use crate::pci::{PciBdf, PciBus};

/// Memory-mapped configuration window (PCIe ECAM / "MMCONFIG"), 4KiB per function.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct PciEcam {
    base: Option<u64>,
}

impl PciEcam {
    pub fn base(&self) -> Option<u64> {
        self.base
    }

    pub fn set_base(&mut self, base: Option<u64>) {
        self.base = base;
    }

    /// Decodes `paddr` into a function and register offset if it falls into the window.
    pub fn decode(&self, paddr: u64) -> Option<(PciBdf, u16)> {
        let base = self.base?;
        let off = paddr.checked_sub(base)?;
        if off >= PCIE_MMCONFIG_SIZE {
            return None;
        }
        let bus = (off / PCIE_MMCONFIG_BUS_STRIDE) as u8;
        let devfn = ((off >> 12) & 0xff) as u16;
        let reg = (off & 0xfff) as u16;
        Some((PciBdf::unpack_u16(u16::from(bus) << 8 | devfn), reg))
    }

    pub fn mmio_read(&self, pci: &mut PciBus, paddr: u64, size: u8) -> Option<u32> {
        let (bdf, reg) = self.decode(paddr)?;
        // Extended config space is not modelled.
        if reg >= 0x100 {
            return Some(0);
        }
        Some(pci.read_config(bdf, reg, size))
    }

    /// Returns `false` when the address is outside the window.
    pub fn mmio_write(&self, pci: &mut PciBus, paddr: u64, size: u8, value: u32) -> bool {
        let Some((bdf, reg)) = self.decode(paddr) else {
            return false;
        };
        if reg < 0x100 {
            pci.write_config(bdf, reg, size, value);
        }
        true
    }
}
