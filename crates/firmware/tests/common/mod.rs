//! Emulated PC platforms for driving `pci_setup` end to end.
#![allow(dead_code)]

use vbios_devices::pci::{
    PciBarDefinition, PciBdf as DevBdf, PciBridgeWindows, PciBus, PciConfigSpace, PciPlatform,
};
use vbios_firmware::bus::PlatformBus;
use vbios_firmware::e820::E820Map;
use vbios_firmware::pci::{PciBdf, PciLayout, PciSetupConfig, PciSetupError};
use vbios_firmware::pci_setup;
use vbios_firmware::romfile::RomFiles;

pub const RAM_2G: u64 = 0x8000_0000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// The PCI hierarchy plus access counters, so tests can tell port and MMIO config cycles
/// apart.
pub struct TestMachine {
    pub platform: PciPlatform,
    pub port_accesses: usize,
    pub mmio_accesses: usize,
}

impl TestMachine {
    pub fn new(bus: PciBus) -> Self {
        Self::from_platform(PciPlatform::new(bus))
    }

    pub fn from_platform(platform: PciPlatform) -> Self {
        Self {
            platform,
            port_accesses: 0,
            mmio_accesses: 0,
        }
    }

    /// Config space of the function currently answering at `bdf`.
    pub fn function(&self, bdf: PciBdf) -> &PciConfigSpace {
        let seg = self
            .platform
            .bus
            .route(bdf.bus())
            .unwrap_or_else(|| panic!("bus {:#x} is not routed", bdf.bus()));
        self.platform
            .bus
            .function(seg, bdf.device(), bdf.function())
            .unwrap_or_else(|| panic!("no function at {bdf}"))
    }

    pub fn function_mut(&mut self, bdf: PciBdf) -> &mut PciConfigSpace {
        let seg = self.platform.bus.route(bdf.bus()).expect("bus is not routed");
        self.platform
            .bus
            .function_mut(seg, bdf.device(), bdf.function())
            .expect("no such function")
    }

    pub fn config_u8(&self, bdf: PciBdf, offset: u16) -> u8 {
        self.function(bdf).read(offset, 1) as u8
    }

    pub fn config_u16(&self, bdf: PciBdf, offset: u16) -> u16 {
        self.function(bdf).read(offset, 2) as u16
    }

    pub fn config_u32(&self, bdf: PciBdf, offset: u16) -> u32 {
        self.function(bdf).read(offset, 4)
    }

    pub fn bar(&self, bdf: PciBdf, index: u8) -> u64 {
        self.function(bdf)
            .bar_base(index)
            .unwrap_or_else(|| panic!("{bdf} has no BAR{index}"))
    }

    /// Config write through the emulated mechanism #1 ports, as a guest would do it.
    pub fn port_config_write_u32(&mut self, bdf: PciBdf, offset: u8, value: u32) {
        let addr = 0x8000_0000 | u32::from(bdf.0) << 8 | u32::from(offset & 0xfc);
        self.platform.io_write(0xcf8, 4, addr);
        self.platform.io_write(0xcfc, 4, value);
    }
}

impl PlatformBus for TestMachine {
    fn io_read(&mut self, port: u16, size: u8) -> u32 {
        self.port_accesses += 1;
        self.platform.io_read(port, size)
    }

    fn io_write(&mut self, port: u16, size: u8, value: u32) {
        self.port_accesses += 1;
        self.platform.io_write(port, size, value);
    }

    fn mmio_read(&mut self, paddr: u64, size: u8) -> u32 {
        self.mmio_accesses += 1;
        self.platform.mmio_read(paddr, size)
    }

    fn mmio_write(&mut self, paddr: u64, size: u8, value: u32) {
        self.mmio_accesses += 1;
        self.platform.mmio_write(paddr, size, value);
    }
}

pub fn bdf(bus: u8, device: u8, function: u8) -> PciBdf {
    PciBdf::new(bus, device, function)
}

pub fn dev_bdf(bdf: PciBdf) -> DevBdf {
    DevBdf::new(bdf.bus(), bdf.device(), bdf.function())
}

pub fn io(size: u32) -> PciBarDefinition {
    PciBarDefinition::Io { size }
}

pub fn mmio32(size: u32) -> PciBarDefinition {
    PciBarDefinition::Mmio32 {
        size,
        prefetchable: false,
    }
}

pub fn pref32(size: u32) -> PciBarDefinition {
    PciBarDefinition::Mmio32 {
        size,
        prefetchable: true,
    }
}

pub fn mmio64(size: u64, prefetchable: bool) -> PciBarDefinition {
    PciBarDefinition::Mmio64 { size, prefetchable }
}

pub fn endpoint(
    vendor: u16,
    device: u16,
    class: u16,
    bars: &[(u8, PciBarDefinition)],
) -> PciConfigSpace {
    let mut cfg = PciConfigSpace::new(vendor, device);
    cfg.set_class(class, 0);
    for &(index, def) in bars {
        cfg.set_bar_definition(index, def);
    }
    cfg
}

/// Red Hat PCI-PCI bridge with I/O and 64-bit prefetchable forwarding.
pub fn redhat_bridge() -> PciConfigSpace {
    PciConfigSpace::new_bridge(0x1b36, 0x0001, PciBridgeWindows::default())
}

/// QEMU generic PCIe root port; capabilities are added by the caller.
pub fn redhat_root_port() -> PciConfigSpace {
    PciConfigSpace::new_bridge(0x1b36, 0x000c, PciBridgeWindows::default())
}

/// Intel 82801 style bridge (no QEMU extensions).
pub fn intel_bridge(windows: PciBridgeWindows) -> PciConfigSpace {
    PciConfigSpace::new_bridge(0x8086, 0x244e, windows)
}

/// e1000 with a 128KiB register BAR, 64 I/O ports and a 256KiB option ROM on INTA#.
pub fn e1000() -> PciConfigSpace {
    let mut nic = endpoint(0x8086, 0x100e, 0x0200, &[(0, mmio32(0x2_0000)), (1, io(0x40))]);
    nic.set_rom_size(0x4_0000);
    nic.set_interrupt_pin(1);
    nic
}

/// Bochs display: 16MiB prefetchable framebuffer, 4KiB MMIO registers, 64KiB ROM.
pub fn std_vga() -> PciConfigSpace {
    let mut vga = endpoint(0x1234, 0x1111, 0x0300, &[(0, pref32(0x100_0000)), (2, mmio32(0x1000))]);
    vga.set_rom_size(0x1_0000);
    vga
}

/// i440FX host bridge with the PIIX3 ISA/IDE functions and the PIIX4 ACPI function at
/// 00:01.x.
pub fn i440fx() -> PciBus {
    let mut bus = PciBus::new();
    let root = bus.root();
    bus.add_function(root, 0, 0, endpoint(0x8086, 0x1237, 0x0600, &[]));

    let mut isa = endpoint(0x8086, 0x7000, 0x0601, &[]);
    isa.set_multifunction(true);
    bus.add_function(root, 1, 0, isa);
    bus.add_function(root, 1, 1, endpoint(0x8086, 0x7010, 0x0101, &[(4, io(0x10))]));

    let mut pm = endpoint(0x8086, 0x7113, 0x0680, &[]);
    pm.set_interrupt_pin(1);
    bus.add_function(root, 1, 3, pm);
    bus
}

/// Q35 MCH with the ICH9 LPC bridge and SMBus controller at 00:1f.x.
pub fn q35() -> PciBus {
    let mut bus = PciBus::new();
    let root = bus.root();
    bus.add_function(root, 0, 0, endpoint(0x8086, 0x29c0, 0x0600, &[]));

    let mut lpc = endpoint(0x8086, 0x2918, 0x0601, &[]);
    lpc.set_multifunction(true);
    bus.add_function(root, 0x1f, 0, lpc);

    let mut smbus = endpoint(0x8086, 0x2930, 0x0c05, &[(4, io(0x20))]);
    smbus.set_interrupt_pin(1);
    bus.add_function(root, 0x1f, 3, smbus);
    bus
}

pub fn pc_config() -> PciSetupConfig {
    PciSetupConfig {
        ram_size: RAM_2G,
        ..PciSetupConfig::default()
    }
}

pub struct Booted {
    pub machine: TestMachine,
    pub e820: E820Map,
    pub layout: PciLayout,
}

pub fn try_boot(
    machine: &mut TestMachine,
    config: PciSetupConfig,
    romfile: &RomFiles,
) -> (E820Map, Result<Option<PciLayout>, PciSetupError>) {
    init_tracing();
    let mut e820 = E820Map::with_default_layout(config.ram_size, config.ram_size_over_4g);
    let res = pci_setup(machine, config, &mut e820, romfile);
    (e820, res)
}

pub fn boot_with(bus: PciBus, config: PciSetupConfig, romfile: &RomFiles) -> Booted {
    let mut machine = TestMachine::new(bus);
    let (e820, res) = try_boot(&mut machine, config, romfile);
    let layout = res.expect("PCI setup failed").expect("no PCI host found");
    Booted {
        machine,
        e820,
        layout,
    }
}

pub fn boot(bus: PciBus) -> Booted {
    boot_with(bus, pc_config(), &RomFiles::new())
}
