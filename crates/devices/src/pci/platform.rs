use crate::pci::{PciBdf, PciBus, PciConfigMechanism1, PciEcam};

const PCI_VENDOR_ID_INTEL: u16 = 0x8086;
const PCI_DEVICE_ID_INTEL_Q35_MCH: u16 = 0x29c0;
const Q35_HOST_BRIDGE_PCIEXBAR: u16 = 0x60;
const Q35_PCIEXBAR_ENABLE: u32 = 1;
const Q35_PCIEXBAR_ADDR_MASK: u32 = 0xF000_0000;

/// One port write that no emulated device claimed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IoWrite {
    pub port: u16,
    pub size: u8,
    pub value: u32,
}

/// PCI hierarchy plus the chipset glue around it: both config access paths and a log of
/// stray port writes (ELCR and friends) for inspection.
pub struct PciPlatform {
    pub bus: PciBus,
    mech1: PciConfigMechanism1,
    ecam: PciEcam,
    io_writes: Vec<IoWrite>,
    /// Whether `0xCF8` is decoded at all (a machine without a PCI host has nothing there).
    host_present: bool,
}

impl PciPlatform {
    pub fn new(bus: PciBus) -> Self {
        Self {
            bus,
            mech1: PciConfigMechanism1::new(),
            ecam: PciEcam::default(),
            io_writes: Vec::new(),
            host_present: true,
        }
    }

    /// A machine with no PCI host bridge: config ports float.
    pub fn without_host() -> Self {
        Self {
            host_present: false,
            ..Self::new(PciBus::new())
        }
    }

    pub fn ecam_base(&self) -> Option<u64> {
        self.ecam.base()
    }

    pub fn io_writes(&self) -> &[IoWrite] {
        &self.io_writes
    }

    /// Last value written to `port`, if any.
    pub fn last_io_write(&self, port: u16) -> Option<u32> {
        self.io_writes
            .iter()
            .rev()
            .find(|w| w.port == port)
            .map(|w| w.value)
    }

    pub fn io_read(&mut self, port: u16, size: u8) -> u32 {
        if self.host_present && PciConfigMechanism1::claims(port) {
            return self.mech1.io_read(&mut self.bus, port, size);
        }
        0xFFFF_FFFF >> (32 - 8 * u32::from(size))
    }

    pub fn io_write(&mut self, port: u16, size: u8, value: u32) {
        if self.host_present && PciConfigMechanism1::claims(port) {
            self.mech1.io_write(&mut self.bus, port, size, value);
            self.sync_pciexbar();
            return;
        }
        self.io_writes.push(IoWrite { port, size, value });
    }

    pub fn mmio_read(&mut self, paddr: u64, size: u8) -> u32 {
        self.ecam
            .mmio_read(&mut self.bus, paddr, size)
            .unwrap_or(0xFFFF_FFFF >> (32 - 8 * u32::from(size)))
    }

    pub fn mmio_write(&mut self, paddr: u64, size: u8, value: u32) {
        if self.ecam.mmio_write(&mut self.bus, paddr, size, value) {
            self.sync_pciexbar();
        }
    }

    /// Mirrors the Q35 PCIEXBAR register (host bridge at 00:00.0) into the ECAM decoder.
    fn sync_pciexbar(&mut self) {
        let host = PciBdf::new(0, 0, 0);
        let root = self.bus.root();
        let Some(cfg) = self.bus.function(root, host.device, host.function) else {
            return;
        };
        if cfg.vendor_id() != PCI_VENDOR_ID_INTEL
            || cfg.device_id() != PCI_DEVICE_ID_INTEL_Q35_MCH
        {
            return;
        }
        let lo = cfg.read(Q35_HOST_BRIDGE_PCIEXBAR, 4);
        let hi = cfg.read(Q35_HOST_BRIDGE_PCIEXBAR + 4, 4);
        let base = (lo & Q35_PCIEXBAR_ENABLE != 0)
            .then(|| u64::from(hi) << 32 | u64::from(lo & Q35_PCIEXBAR_ADDR_MASK));
        self.ecam.set_base(base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::PciConfigSpace;

    fn q35() -> PciPlatform {
        let mut bus = PciBus::new();
        let root = bus.root();
        bus.add_function(root, 0, 0, PciConfigSpace::new(0x8086, 0x29c0));
        PciPlatform::new(bus)
    }

    #[test]
    fn pciexbar_enables_ecam() {
        let mut p = q35();
        p.io_write(0xCF8, 4, 0x8000_0060);
        p.io_write(0xCFC, 4, 0xB000_0001);
        assert_eq!(p.ecam_base(), Some(0xB000_0000));
        assert_eq!(p.mmio_read(0xB000_0000, 2), 0x8086);

        p.mmio_write(0xB000_0060, 4, 0);
        assert_eq!(p.ecam_base(), None);
    }

    #[test]
    fn missing_host_floats_config_ports() {
        let mut p = PciPlatform::without_host();
        p.io_write(0xCF8, 4, 0x8000_0000);
        assert_eq!(p.io_read(0xCF8, 4), 0xFFFF_FFFF);
    }

    #[test]
    fn stray_port_writes_are_logged() {
        let mut p = q35();
        p.io_write(0x4d1, 1, 0x0c);
        assert_eq!(p.last_io_write(0x4d1), Some(0x0c));
        assert_eq!(p.last_io_write(0x4d0), None);
    }
}
