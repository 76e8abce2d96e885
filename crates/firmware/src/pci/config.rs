use vbios_pc_constants::{PCI_CFG_ADDR_PORT, PCI_CFG_DATA_PORT};

use super::regs::*;
use super::PciBdf;
use crate::bus::PlatformBus;

/// Capability walks give up after this many hops so a looping list cannot hang POST.
const CAP_WALK_LIMIT: u32 = 0x100;

/// Configuration space accessor.
///
/// Starts out on configuration mechanism #1 (`0xCF8`/`0xCFC`). Once [`PciConfig::enable_mmconfig`]
/// has been called every access goes through the memory-mapped window instead; there is no
/// way back.
pub struct PciConfig<'a> {
    bus: &'a mut dyn PlatformBus,
    mmconfig: Option<u64>,
}

/// Mechanism #1 selector: enable bit, BDF in bits 8..=23, dword register number in bits 2..=7.
pub(crate) fn cfg_addr(bdf: PciBdf, offset: u8) -> u32 {
    0x8000_0000 | (u32::from(bdf.0) << 8) | (u32::from(offset) & 0xfc)
}

/// Memory-mapped address of a config register: 4KiB per function.
pub(crate) fn mmconfig_addr(base: u64, bdf: PciBdf, offset: u8) -> u64 {
    base + (u64::from(bdf.0) << 12) + u64::from(offset)
}

impl<'a> PciConfig<'a> {
    pub fn new(bus: &'a mut dyn PlatformBus) -> Self {
        Self {
            bus,
            mmconfig: None,
        }
    }

    /// Raw platform access for the few callers that need ports outside config space
    /// (ELCR, PM registers).
    pub fn platform(&mut self) -> &mut dyn PlatformBus {
        &mut *self.bus
    }

    pub fn mmconfig_base(&self) -> Option<u64> {
        self.mmconfig
    }

    /// Switches all further accesses to the memory-mapped window at `base`.
    ///
    /// Windows above 4GiB cannot be reached from the 32-bit firmware and are ignored.
    pub fn enable_mmconfig(&mut self, base: u64, name: &str) {
        if base >= 1 << 32 {
            tracing::warn!(
                base = format_args!("{base:#x}"),
                "{name}: mmconfig window above 4G, keeping port access"
            );
            return;
        }
        tracing::info!(base = format_args!("{base:#x}"), "PCI: Using {name} mmconfig");
        self.mmconfig = Some(base);
    }

    /// Checks that a mechanism #1 host bridge answers on `0xCF8`.
    pub fn probe_host(&mut self) -> bool {
        self.bus.io_write_u32(PCI_CFG_ADDR_PORT, 0x8000_0000);
        let v = self.bus.io_read_u32(PCI_CFG_ADDR_PORT);
        if v != 0x8000_0000 {
            tracing::debug!(readback = format_args!("{v:#x}"), "detected non-PCI system");
            return false;
        }
        true
    }

    pub fn read_u32(&mut self, bdf: PciBdf, offset: u8) -> u32 {
        match self.mmconfig {
            Some(base) => self.bus.mmio_read(mmconfig_addr(base, bdf, offset), 4),
            None => {
                self.bus.io_write_u32(PCI_CFG_ADDR_PORT, cfg_addr(bdf, offset));
                self.bus.io_read_u32(PCI_CFG_DATA_PORT)
            }
        }
    }

    pub fn read_u16(&mut self, bdf: PciBdf, offset: u8) -> u16 {
        match self.mmconfig {
            Some(base) => self.bus.mmio_read(mmconfig_addr(base, bdf, offset), 2) as u16,
            None => {
                self.bus.io_write_u32(PCI_CFG_ADDR_PORT, cfg_addr(bdf, offset));
                self.bus.io_read_u16(PCI_CFG_DATA_PORT + u16::from(offset & 2))
            }
        }
    }

    pub fn read_u8(&mut self, bdf: PciBdf, offset: u8) -> u8 {
        match self.mmconfig {
            Some(base) => self.bus.mmio_read(mmconfig_addr(base, bdf, offset), 1) as u8,
            None => {
                self.bus.io_write_u32(PCI_CFG_ADDR_PORT, cfg_addr(bdf, offset));
                self.bus.io_read_u8(PCI_CFG_DATA_PORT + u16::from(offset & 3))
            }
        }
    }

    pub fn write_u32(&mut self, bdf: PciBdf, offset: u8, val: u32) {
        match self.mmconfig {
            Some(base) => self.bus.mmio_write(mmconfig_addr(base, bdf, offset), 4, val),
            None => {
                self.bus.io_write_u32(PCI_CFG_ADDR_PORT, cfg_addr(bdf, offset));
                self.bus.io_write_u32(PCI_CFG_DATA_PORT, val);
            }
        }
    }

    pub fn write_u16(&mut self, bdf: PciBdf, offset: u8, val: u16) {
        match self.mmconfig {
            Some(base) => self.bus.mmio_write(mmconfig_addr(base, bdf, offset), 2, u32::from(val)),
            None => {
                self.bus.io_write_u32(PCI_CFG_ADDR_PORT, cfg_addr(bdf, offset));
                self.bus.io_write_u16(PCI_CFG_DATA_PORT + u16::from(offset & 2), val);
            }
        }
    }

    pub fn write_u8(&mut self, bdf: PciBdf, offset: u8, val: u8) {
        match self.mmconfig {
            Some(base) => self.bus.mmio_write(mmconfig_addr(base, bdf, offset), 1, u32::from(val)),
            None => {
                self.bus.io_write_u32(PCI_CFG_ADDR_PORT, cfg_addr(bdf, offset));
                self.bus.io_write_u8(PCI_CFG_DATA_PORT + u16::from(offset & 3), val);
            }
        }
    }

    /// Read-modify-write of a 16-bit register: clears `off`, then sets `on`.
    pub fn mask_u16(&mut self, bdf: PciBdf, offset: u8, off: u16, on: u16) {
        let val = self.read_u16(bdf, offset);
        self.write_u16(bdf, offset, (val & !off) | on);
    }

    /// Returns the config offset of the first capability with id `cap_id` after `prev`
    /// (`0` starts at the list head), or `0` if there is none.
    pub fn find_capability(&mut self, bdf: PciBdf, cap_id: u8, prev: u8) -> u8 {
        let mut cap = if prev == 0 {
            let status = self.read_u16(bdf, PCI_STATUS);
            if status & PCI_STATUS_CAP_LIST == 0 {
                return 0;
            }
            self.read_u8(bdf, PCI_CAPABILITY_LIST)
        } else {
            self.read_u8(bdf, prev.wrapping_add(PCI_CAP_LIST_NEXT))
        };

        let mut hops = 0;
        while cap != 0 && hops < CAP_WALK_LIMIT {
            if self.read_u8(bdf, cap) == cap_id {
                return cap;
            }
            cap = self.read_u8(bdf, cap.wrapping_add(PCI_CAP_LIST_NEXT));
            hops += 1;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfg_addr_masks_low_offset_bits() {
        let bdf = PciBdf::new(1, 2, 3);
        assert_eq!(cfg_addr(bdf, 0x3d), 0x8001_133c);
        assert_eq!(cfg_addr(bdf, 0x3c), 0x8001_133c);
        assert_eq!(cfg_addr(PciBdf::new(0xff, 0x1f, 7), 0xff), 0x80ff_fffc);
    }

    #[test]
    fn mmconfig_addr_uses_4k_per_function() {
        let bdf = PciBdf::new(1, 2, 3);
        assert_eq!(mmconfig_addr(0xb000_0000, bdf, 0x3d), 0xb011_303d);
        // Both schemes must select the same function.
        assert_eq!(
            (mmconfig_addr(0, bdf, 0) >> 12) as u32,
            (cfg_addr(bdf, 0) & 0x00ff_ff00) >> 8
        );
    }
}
