mod common;

use common::*;
use pretty_assertions::assert_eq;
use vbios_devices::pci::{PciBridgeWindows, QemuResourceReserve};
use vbios_firmware::pci::{PciBdf, PciRegionType};
use vbios_firmware::romfile::RomFiles;

fn bus_numbers(b: &Booted, bridge: PciBdf) -> (u8, u8, u8) {
    let cfg = b.machine.function(bridge);
    (cfg.primary_bus(), cfg.secondary_bus(), cfg.subordinate_bus())
}

#[test]
fn nested_bridges_are_numbered_depth_first() {
    let mut bus = i440fx();
    let root = bus.root();
    let seg1 = bus.add_bridge(root, 4, 0, redhat_bridge());
    let seg2 = bus.add_bridge(seg1, 0, 0, intel_bridge(PciBridgeWindows::default()));
    let mut leaf = endpoint(0x1af4, 0x1000, 0x0200, &[(0, io(0x20))]);
    leaf.set_interrupt_pin(1);
    bus.add_function(seg2, 1, 0, leaf);
    bus.add_bridge(root, 5, 0, redhat_bridge());

    let b = boot(bus);
    assert_eq!(bus_numbers(&b, bdf(0, 4, 0)), (0, 1, 2));
    assert_eq!(bus_numbers(&b, bdf(1, 0, 0)), (1, 2, 2));
    assert_eq!(bus_numbers(&b, bdf(0, 5, 0)), (0, 3, 3));
    assert_eq!(b.layout.max_bus, 3);

    let devices = &b.layout.devices;
    let leaf = devices.by_bdf(bdf(2, 1, 0)).unwrap();
    let ancestors: Vec<PciBdf> = devices.ancestors(leaf).map(|p| devices[p].bdf).collect();
    assert_eq!(ancestors, vec![bdf(1, 0, 0), bdf(0, 4, 0)]);
    assert_eq!(devices[leaf].rootbus, 0);

    // Swizzle through both bridges: 1 (own slot) + 0 (inner bridge) + slot 4 - 1 wraps to
    // PIRQA.
    assert_eq!(b.machine.config_u8(bdf(2, 1, 0), 0x3c), 10);
}

#[test]
fn function_scan_respects_multifunction_bit() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(root, 6, 0, endpoint(0x1234, 0x0001, 0x0880, &[]));
    // Unreachable: function 0 does not advertise multi-function.
    bus.add_function(root, 6, 2, endpoint(0x1234, 0x0002, 0x0880, &[]));

    let b = boot(bus);
    let found: Vec<PciBdf> = b.layout.devices.iter().map(|d| d.bdf).collect();
    assert_eq!(
        found,
        vec![
            bdf(0, 0, 0),
            bdf(0, 1, 0),
            bdf(0, 1, 1),
            bdf(0, 1, 3),
            bdf(0, 6, 0),
        ]
    );
}

#[test]
fn second_function_bar_is_mapped() {
    let mut bus = i440fx();
    let root = bus.root();
    let mut f0 = endpoint(0x1234, 0x0003, 0x0880, &[]);
    f0.set_multifunction(true);
    bus.add_function(root, 6, 0, f0);
    bus.add_function(root, 6, 1, endpoint(0x1234, 0x0004, 0x0880, &[(0, mmio32(0x2000))]));

    let b = boot(bus);
    let f1 = bdf(0, 6, 1);
    assert!(b.layout.devices.by_bdf(f1).is_some());

    let mem = b
        .layout
        .regions_of(f1)
        .find(|r| r.kind == PciRegionType::Mem)
        .unwrap();
    assert_eq!(mem.size, 0x2000);
    assert_eq!(mem.addr % 0x2000, 0);
    assert!(b.layout.mem32.contains(mem.addr, mem.size));
    assert_eq!(b.machine.bar(f1, 0), mem.addr);
}

#[test]
fn resource_reserve_capability_extends_subordinate_bus() {
    let mut bus = i440fx();
    let root = bus.root();
    let mut port = redhat_bridge();
    port.add_capability(Box::new(
        QemuResourceReserve {
            bus: Some(3),
            io: Some(0x2000),
            mem: Some(0x40_0000),
            ..QemuResourceReserve::default()
        }
        .capability(),
    ));
    bus.add_bridge(root, 4, 0, port);
    bus.add_bridge(root, 5, 0, redhat_bridge());

    let b = boot(bus);
    assert_eq!(bus_numbers(&b, bdf(0, 4, 0)), (0, 1, 4));
    assert_eq!(bus_numbers(&b, bdf(0, 5, 0)), (0, 5, 5));

    // The reservation sizes the windows of the empty bus.
    let cfg = b.machine.function(bdf(0, 4, 0));
    let (io_base, io_limit) = cfg.io_window().unwrap();
    assert_eq!(io_limit + 1 - io_base, 0x2000);
    let (mem_base, mem_limit) = cfg.mem_window().unwrap();
    assert_eq!(mem_limit + 1 - mem_base, 0x40_0000);
    assert_eq!(mem_base % 0x20_0000, 0);
}

#[test]
fn truncated_resource_reserve_capability_is_ignored() {
    let mut bus = i440fx();
    let root = bus.root();
    let mut port = redhat_bridge();
    port.add_capability(Box::new(
        QemuResourceReserve {
            bus: Some(3),
            ..QemuResourceReserve::default()
        }
        .capability_with_len(16),
    ));
    bus.add_bridge(root, 4, 0, port);

    let b = boot(bus);
    assert_eq!(bus_numbers(&b, bdf(0, 4, 0)), (0, 1, 1));
}

#[test]
fn extra_root_buses_are_scanned() {
    let mut bus = i440fx();
    let extra = bus.add_root_bus(0x40);
    bus.add_function(extra, 0, 0, endpoint(0x1af4, 0x1000, 0x0200, &[(0, io(0x20))]));

    let mut romfile = RomFiles::new();
    romfile.insert_int("etc/extra-pci-roots", 1);
    let b = boot_with(bus, pc_config(), &romfile);

    let devices = &b.layout.devices;
    let id = devices.by_bdf(bdf(0x40, 0, 0)).expect("device on extra root bus");
    assert_eq!(devices[id].parent, None);
    assert_eq!(devices[id].rootbus, 1);
    // Scanning stops at the extra root; nothing above it was probed.
    assert_eq!(b.layout.max_bus, 0x40);

    // Its requests share the root window of bus 0.
    let io = b
        .layout
        .regions_of(bdf(0x40, 0, 0))
        .find(|r| r.kind == PciRegionType::Io)
        .unwrap();
    assert!(b.layout.io.contains(io.addr, io.size));
    assert_eq!(b.machine.bar(bdf(0x40, 0, 0), 0), io.addr);
}

#[test]
fn extra_root_buses_are_invisible_without_romfile() {
    let mut bus = i440fx();
    let extra = bus.add_root_bus(0x40);
    bus.add_function(extra, 0, 0, endpoint(0x1af4, 0x1000, 0x0200, &[(0, io(0x20))]));

    let b = boot(bus);
    assert_eq!(b.layout.devices.by_bdf(bdf(0x40, 0, 0)), None);
    assert_eq!(b.machine.bar(bdf(0x40, 0, 0), 0), 0);
}
