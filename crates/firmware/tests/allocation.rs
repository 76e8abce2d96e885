mod common;

use common::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use vbios_devices::pci::{
    PciBarDefinition, PciBridgeWindows, PciExpressCapability, PciPrefWindow, QemuResourceReserve,
    ShpcCapability,
};
use vbios_firmware::e820::E820Type;
use vbios_firmware::pci::{BarSlot, MappedRegion, PciBdf, PciRegionType, PciSetupError, PciWindow};
use vbios_firmware::romfile::RomFiles;

fn region(b: &Booted, bdf: PciBdf, slot: BarSlot) -> MappedRegion {
    *b.layout
        .regions_of(bdf)
        .find(|r| r.slot == slot)
        .unwrap_or_else(|| panic!("{bdf} {slot:?} was not mapped"))
}

fn pc_with_vga_and_nic() -> Booted {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(root, 2, 0, std_vga());
    bus.add_function(root, 3, 0, e1000());
    boot(bus)
}

#[test]
fn root_windows_are_packed_by_descending_alignment() {
    let b = pc_with_vga_and_nic();
    let (vga, nic, ide) = (bdf(0, 2, 0), bdf(0, 3, 0), bdf(0, 1, 1));

    assert_eq!(b.layout.io, PciWindow { start: 0xc000, end: 0xc050 });
    assert_eq!(b.machine.bar(nic, 1), 0xc000);
    assert_eq!(b.machine.bar(ide, 4), 0xc040);

    // Plain memory sits on top of the window since its largest alignment is smaller.
    assert_eq!(b.machine.function(nic).rom_base(), 0xfeb8_0000);
    assert_eq!(b.machine.bar(nic, 0), 0xfebc_0000);
    assert_eq!(b.machine.function(vga).rom_base(), 0xfebe_0000);
    assert_eq!(b.machine.bar(vga, 2), 0xfebf_0000);
    assert_eq!(b.machine.bar(vga, 0), 0xfd00_0000);

    assert_eq!(b.layout.mem32, PciWindow { start: 0x8000_0000, end: 0xfec0_0000 });
    assert_eq!(b.layout.mem64, None);
    assert_eq!(region(&b, vga, BarSlot::Rom).kind, PciRegionType::Mem);
    assert_eq!(region(&b, vga, BarSlot::Bar(0)).kind, PciRegionType::PrefMem);
}

#[test]
fn large_ram_moves_window_start() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(root, 3, 0, e1000());
    let config = vbios_firmware::PciSetupConfig {
        ram_size: 0xb000_0000,
        ..pc_config()
    };
    let b = boot_with(bus, config, &RomFiles::new());
    assert_eq!(b.layout.mem32.start, 0xc000_0000);
}

#[test]
fn small_memory_bars_get_a_full_page() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(
        root,
        3,
        0,
        endpoint(0x1234, 0x0010, 0x0880, &[(0, mmio32(0x100)), (1, mmio32(0x1000))]),
    );
    let b = boot(bus);

    let small = region(&b, bdf(0, 3, 0), BarSlot::Bar(0));
    assert_eq!(small.size, 0x1000);
    assert_eq!(small.addr % 0x1000, 0);
    let other = region(&b, bdf(0, 3, 0), BarSlot::Bar(1));
    assert!(small.addr + 0x1000 <= other.addr || other.addr + 0x1000 <= small.addr);
}

#[test]
fn bridge_windows_cover_their_children() {
    let mut bus = i440fx();
    let root = bus.root();
    let seg = bus.add_bridge(root, 4, 0, redhat_bridge());
    let mut child = endpoint(
        0x1af4,
        0x1041,
        0x0200,
        &[(0, io(0x100)), (1, mmio32(0x10_0000)), (4, mmio64(0x80_0000, true))],
    );
    child.set_interrupt_pin(1);
    bus.add_function(seg, 0, 0, child);

    let b = boot(bus);
    let (bridge, child) = (bdf(0, 4, 0), bdf(1, 0, 0));
    let cfg = b.machine.function(bridge);
    assert_eq!(cfg.io_window(), Some((0xc000, 0xcfff)));
    assert_eq!(cfg.mem_window(), Some((0xfea0_0000, 0xfebf_ffff)));
    assert_eq!(cfg.pref_window(), Some((0xfe00_0000, 0xfe7f_ffff)));
    assert_eq!(b.machine.bar(bdf(0, 1, 1), 4), 0xd000);

    assert_eq!(b.machine.bar(child, 0), 0xc000);
    assert_eq!(b.machine.bar(child, 1), 0xfea0_0000);
    assert_eq!(b.machine.bar(child, 4), 0xfe00_0000);

    let window = region(&b, bridge, BarSlot::BridgeWindow);
    assert_eq!(window.kind, PciRegionType::Io);
    let pref = b
        .layout
        .regions_of(bridge)
        .find(|r| r.kind == PciRegionType::PrefMem)
        .unwrap();
    assert!(pref.is64);

    // Slot 4 INTA# through a bridge: PIRQD.
    assert_eq!(b.machine.config_u8(child, 0x3c), 11);
    // Forwarding and SERR reporting on the bridge.
    assert_eq!(b.machine.function(bridge).command() & 0x0103, 0x0103);
    assert_ne!(b.machine.function(bridge).bridge_control() & 0x0002, 0);
}

#[test]
fn bridge_without_io_forwarding_leaves_io_bars_unmapped() {
    let mut bus = i440fx();
    let root = bus.root();
    let windows = PciBridgeWindows {
        io: false,
        pref: PciPrefWindow::None,
    };
    let seg = bus.add_bridge(root, 4, 0, intel_bridge(windows));
    bus.add_function(
        seg,
        0,
        0,
        endpoint(0x1234, 0x0020, 0x0880, &[(0, io(0x40)), (1, pref32(0x10_0000))]),
    );

    let b = boot(bus);
    let child = bdf(1, 0, 0);
    let kinds: Vec<PciRegionType> = b.layout.regions_of(child).map(|r| r.kind).collect();
    // The prefetchable request could not be forwarded either and was dropped with the I/O one.
    assert_eq!(kinds, Vec::<PciRegionType>::new());
    assert_eq!(b.machine.bar(child, 0), 0);
    assert_eq!(b.machine.function(bdf(0, 4, 0)).io_window(), None);
    // Only the IDE controller is left in the root I/O window.
    assert_eq!(b.layout.io, PciWindow { start: 0xc000, end: 0xc010 });
}

#[test]
fn hotplug_capable_bridge_reserves_windows() {
    let mut bus = i440fx();
    let root = bus.root();
    let mut bridge = intel_bridge(PciBridgeWindows::default());
    bridge.add_capability(Box::new(ShpcCapability));
    bus.add_bridge(root, 4, 0, bridge);

    let b = boot(bus);
    let cfg = b.machine.function(bdf(0, 4, 0));
    let len = |w: Option<(u64, u64)>| w.map(|(base, limit)| limit + 1 - base);
    assert_eq!(len(cfg.io_window()), Some(0x1000));
    assert_eq!(len(cfg.mem_window()), Some(0x20_0000));
    assert_eq!(len(cfg.pref_window()), Some(0x20_0000));
}

#[test]
fn pcie_slot_reserves_memory_but_not_io() {
    let mut bus = i440fx();
    let root = bus.root();
    let mut port = redhat_root_port();
    port.add_capability(Box::new(PciExpressCapability::root_port(true)));
    bus.add_bridge(root, 4, 0, port);

    let b = boot(bus);
    let cfg = b.machine.function(bdf(0, 4, 0));
    let len = |w: Option<(u64, u64)>| w.map(|(base, limit)| limit + 1 - base);
    assert_eq!(cfg.io_window(), None);
    assert_eq!(len(cfg.mem_window()), Some(0x20_0000));
    assert_eq!(len(cfg.pref_window()), Some(0x20_0000));
}

#[test]
fn conflicting_prefetchable_reservation_falls_back_to_demand() {
    let mut bus = i440fx();
    let root = bus.root();
    let mut both = redhat_bridge();
    both.add_capability(Box::new(
        QemuResourceReserve {
            mem: Some(0x80_0000),
            pref32: Some(0x400_0000),
            pref64: Some(0x400_0000),
            ..QemuResourceReserve::default()
        }
        .capability(),
    ));
    let seg = bus.add_bridge(root, 4, 0, both);
    bus.add_function(seg, 0, 0, endpoint(0x1234, 0x0021, 0x0880, &[(0, pref32(0x10_0000))]));

    let mut only64 = redhat_bridge();
    only64.add_capability(Box::new(
        QemuResourceReserve {
            pref64: Some(0x400_0000),
            ..QemuResourceReserve::default()
        }
        .capability(),
    ));
    bus.add_bridge(root, 5, 0, only64);

    let b = boot(bus);
    let len = |w: Option<(u64, u64)>| w.map(|(base, limit)| limit + 1 - base);

    let cfg = b.machine.function(bdf(0, 4, 0));
    // The plain memory hint still applies; the prefetchable one is ignored.
    assert_eq!(len(cfg.mem_window()), Some(0x80_0000));
    assert_eq!(len(cfg.pref_window()), Some(0x20_0000));

    let cfg = b.machine.function(bdf(0, 5, 0));
    assert_eq!(len(cfg.pref_window()), Some(0x400_0000));
}

#[test]
fn empty_bridge_without_hotplug_stays_closed() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_bridge(root, 4, 0, intel_bridge(PciBridgeWindows::default()));

    let b = boot(bus);
    let cfg = b.machine.function(bdf(0, 4, 0));
    assert_eq!(cfg.mem_window(), None);
    assert_eq!(cfg.pref_window(), None);
}

#[test]
fn oversized_64bit_bars_move_above_ram() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(root, 3, 0, e1000());
    bus.add_function(
        root,
        4,
        0,
        endpoint(0x10de, 0x1db4, 0x0302, &[(0, mmio64(0x1_0000_0000, true))]),
    );
    // USB controllers are never moved, even with a 64-bit BAR.
    bus.add_function(root, 5, 0, endpoint(0x1b36, 0x000d, 0x0c03, &[(0, mmio64(0x4000, false))]));

    let config = vbios_firmware::PciSetupConfig {
        ram_size_over_4g: 0x4000_0000,
        ..pc_config()
    };
    let b = boot_with(bus, config, &RomFiles::new());

    // Plain 64-bit memory is empty, so its base is the first GiB above RAM; the
    // prefetchable window then aligns up to the 4GiB BAR.
    assert_eq!(
        b.layout.mem64,
        Some(PciWindow {
            start: 0x1_4000_0000,
            end: 0x3_0000_0000,
        })
    );
    assert_eq!(b.machine.bar(bdf(0, 4, 0), 0), 0x2_0000_0000);
    assert!(region(&b, bdf(0, 4, 0), BarSlot::Bar(0)).is64);

    assert_eq!(b.machine.bar(bdf(0, 3, 0), 0), 0xfebc_0000);
    assert_eq!(b.machine.bar(bdf(0, 5, 0), 0), 0xfebe_0000);
    assert_eq!(b.e820.lookup(0x2_0000_0000), Some(E820Type::Reserved));
}

#[test]
fn reserved_memory_end_raises_64bit_floor() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(
        root,
        4,
        0,
        endpoint(0x10de, 0x1db4, 0x0302, &[(0, mmio64(0x1_0000_0000, true))]),
    );

    let mut romfile = RomFiles::new();
    romfile.insert_int("etc/reserved-memory-end", 0x2_1000_0000);
    let b = boot_with(bus, pc_config(), &romfile);
    assert_eq!(b.machine.bar(bdf(0, 4, 0), 0), 0x3_0000_0000);
}

#[test]
fn usb_behind_64bit_bridge_does_not_pin_the_window_low() {
    let mut bus = i440fx();
    let root = bus.root();
    let seg = bus.add_bridge(root, 4, 0, redhat_bridge());
    bus.add_function(
        seg,
        0,
        0,
        endpoint(0x10de, 0x1db4, 0x0302, &[(0, mmio64(0x8000_0000, true))]),
    );
    bus.add_function(seg, 1, 0, endpoint(0x1b36, 0x000d, 0x0c03, &[(0, mmio64(0x4000, true))]));

    let mut machine = TestMachine::new(bus);
    let (_, res) = try_boot(&mut machine, pc_config(), &RomFiles::new());
    let layout = res.expect("PCI setup failed").expect("no PCI host found");

    // The whole prefetchable window moved above RAM, USB controller included.
    assert_eq!(
        layout.mem64,
        Some(PciWindow {
            start: 0x1_0000_0000,
            end: 0x2_0000_0000,
        })
    );
    assert_eq!(
        machine.function(bdf(0, 4, 0)).pref_window(),
        Some((0x1_0000_0000, 0x1_ffff_ffff))
    );
    assert_eq!(machine.bar(bdf(1, 0, 0), 0), 0x1_0000_0000);
    assert_eq!(machine.bar(bdf(1, 1, 0), 0), 0x1_8000_0000);
}

#[test]
fn out_of_32bit_space_is_fatal() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(root, 3, 0, endpoint(0x1234, 0x0030, 0x0300, &[(0, pref32(0x4000_0000))]));
    bus.add_function(root, 4, 0, endpoint(0x1234, 0x0030, 0x0300, &[(0, pref32(0x4000_0000))]));

    let mut machine = TestMachine::new(bus);
    let (_, res) = try_boot(&mut machine, pc_config(), &RomFiles::new());
    let err = res.unwrap_err();
    assert_eq!(
        err,
        PciSetupError::OutOf32BitSpace {
            start: 0x8000_0000,
            end: 0xfec0_0000,
        }
    );
    assert!(err.is_fatal());
}

#[test]
fn io_exhaustion_is_fatal() {
    let mut bus = i440fx();
    let root = bus.root();
    bus.add_function(
        root,
        3,
        0,
        endpoint(0x1234, 0x0040, 0x0880, &[(0, io(0x8000)), (1, io(0x1000))]),
    );

    let mut machine = TestMachine::new(bus);
    let (_, res) = try_boot(&mut machine, pc_config(), &RomFiles::new());
    assert_eq!(res.unwrap_err(), PciSetupError::OutOfIoSpace { demand: 0x9010 });
}

#[derive(Clone, Copy, Debug)]
enum BarSpec {
    Io(u32),
    Mem32(u32, bool),
    Mem64(u64, bool),
}

impl BarSpec {
    fn definition(self) -> PciBarDefinition {
        match self {
            Self::Io(size) => io(size),
            Self::Mem32(size, pref) => PciBarDefinition::Mmio32 {
                size,
                prefetchable: pref,
            },
            Self::Mem64(size, pref) => mmio64(size, pref),
        }
    }
}

fn bar_spec() -> impl Strategy<Value = BarSpec> {
    prop_oneof![
        (4u32..9).prop_map(|s| BarSpec::Io(1 << s)),
        (8u32..25, any::<bool>()).prop_map(|(s, p)| BarSpec::Mem32(1 << s, p)),
        (12u32..25, any::<bool>()).prop_map(|(s, p)| BarSpec::Mem64(1 << s, p)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn mapped_bars_are_aligned_and_disjoint(
        devices in proptest::collection::vec(proptest::collection::vec(bar_spec(), 1..=3), 1..8)
    ) {
        let mut bus = i440fx();
        let root = bus.root();
        for (i, bars) in devices.iter().enumerate() {
            // BARs go to even slots so a 64-bit BAR always has room for its high half.
            let defs: Vec<(u8, PciBarDefinition)> = bars
                .iter()
                .enumerate()
                .map(|(j, spec)| (2 * j as u8, spec.definition()))
                .collect();
            bus.add_function(
                root,
                2 + i as u8,
                0,
                endpoint(0x1234, 0x1000 + i as u16, 0x0880, &defs),
            );
        }
        let b = boot(bus);
        prop_assert_eq!(b.layout.mem64, None);

        let mut io_ranges = Vec::new();
        let mut mem_ranges = Vec::new();
        for r in b.layout.regions.iter().filter(|r| r.slot != BarSlot::BridgeWindow) {
            prop_assert_eq!(r.addr % r.size, 0, "{:?} is misaligned", r);
            if let BarSlot::Bar(index) = r.slot {
                prop_assert_eq!(b.machine.bar(r.bdf, index), r.addr);
            }
            match r.kind {
                PciRegionType::Io => {
                    prop_assert!(b.layout.io.contains(r.addr, r.size));
                    io_ranges.push((r.addr, r.size));
                }
                _ => {
                    prop_assert!(b.layout.mem32.contains(r.addr, r.size));
                    mem_ranges.push((r.addr, r.size));
                }
            }
        }

        let requested: usize = devices.iter().map(Vec::len).sum();
        // The IDE controller's BAR4 comes on top.
        prop_assert_eq!(io_ranges.len() + mem_ranges.len(), requested + 1);

        for ranges in [&mut io_ranges, &mut mem_ranges] {
            ranges.sort_unstable();
            for w in ranges.windows(2) {
                prop_assert!(w[0].0 + w[0].1 <= w[1].0, "{:x?} overlaps {:x?}", w[0], w[1]);
            }
        }
    }
}
