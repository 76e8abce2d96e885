use vbios_pc_constants::{PCI_CFG_ADDR_PORT, PCI_CFG_DATA_PORT};

use crate::pci::{PciBdf, PciBus};

/// Emulation of PCI Configuration Mechanism #1 (0xCF8/0xCFC).
#[derive(Debug, Default)]
pub struct PciConfigMechanism1 {
    addr: u32,
}

impl PciConfigMechanism1 {
    pub fn new() -> Self {
        Self { addr: 0 }
    }

    pub fn claims(port: u16) -> bool {
        port == PCI_CFG_ADDR_PORT || (PCI_CFG_DATA_PORT..=PCI_CFG_DATA_PORT + 3).contains(&port)
    }

    /// Target of a data port access, or `None` while the enable bit is clear.
    fn target(&self, port: u16) -> Option<(PciBdf, u16)> {
        if self.addr & 0x8000_0000 == 0 {
            return None;
        }
        let bdf = PciBdf::unpack_u16((self.addr >> 8) as u16);
        let reg = (self.addr & 0xFC) as u16;
        Some((bdf, reg + (port - PCI_CFG_DATA_PORT)))
    }

    pub fn io_read(&mut self, pci: &mut PciBus, port: u16, size: u8) -> u32 {
        if port == PCI_CFG_ADDR_PORT {
            return read_u32_part(self.addr, size);
        }
        match self.target(port) {
            Some((bdf, offset)) => pci.read_config(bdf, offset, size),
            None => read_u32_part(0xFFFF_FFFF, size),
        }
    }

    pub fn io_write(&mut self, pci: &mut PciBus, port: u16, size: u8, value: u32) {
        if port == PCI_CFG_ADDR_PORT {
            // Only a full dword write latches the address; narrower writes go to other
            // chipset registers sharing the port range.
            if size == 4 {
                self.addr = value;
            }
            return;
        }
        if let Some((bdf, offset)) = self.target(port) {
            pci.write_config(bdf, offset, size, value);
        }
    }
}

fn read_u32_part(value: u32, size: u8) -> u32 {
    match size {
        1 => value & 0xFF,
        2 => value & 0xFFFF,
        4 => value,
        _ => panic!("invalid read size {size}"),
    }
}
