use super::capability::{find_resource_reserve_capability, ResourceReserve};
use super::config::PciConfig;
use super::device::bus_functions;
use super::regs::*;

/// Assigns secondary/subordinate bus numbers to every PCI-to-PCI bridge reachable from bus 0
/// (and from any extra root bus when `extraroots` is set). Returns the highest bus number
/// handed out.
pub(crate) fn init_bus(cfg: &mut PciConfig<'_>, extraroots: u64) -> u8 {
    let mut pci_bus = 0u8;
    init_bus_rec(cfg, 0, &mut pci_bus);

    if extraroots != 0 {
        while pci_bus < 0xff {
            pci_bus += 1;
            let bus = pci_bus;
            init_bus_rec(cfg, bus, &mut pci_bus);
        }
    }
    pci_bus
}

fn init_bus_rec(cfg: &mut PciConfig<'_>, bus: u8, pci_bus: &mut u8) {
    tracing::debug!(bus = format_args!("{bus:#x}"), "PCI: init bus");

    let functions = bus_functions(cfg, bus);

    // Nothing below this bus may forward config cycles until it has been numbered.
    for &bdf in &functions {
        if cfg.read_u16(bdf, PCI_CLASS_DEVICE) == PCI_CLASS_BRIDGE_PCI {
            cfg.write_u8(bdf, PCI_SECONDARY_BUS, 255);
            cfg.write_u8(bdf, PCI_SUBORDINATE_BUS, 0);
        }
    }

    for &bdf in &functions {
        if cfg.read_u16(bdf, PCI_CLASS_DEVICE) != PCI_CLASS_BRIDGE_PCI {
            continue;
        }

        let pribus = cfg.read_u8(bdf, PCI_PRIMARY_BUS);
        if pribus != bus {
            tracing::debug!(bdf = %bdf, "PCI: primary bus = {pribus:#x} -> {bus:#x}");
            cfg.write_u8(bdf, PCI_PRIMARY_BUS, bus);
        }

        if *pci_bus == u8::MAX {
            tracing::warn!(bdf = %bdf, "PCI: out of bus numbers, bridge left closed");
            continue;
        }
        *pci_bus += 1;
        let secbus = *pci_bus;
        if cfg.read_u8(bdf, PCI_SECONDARY_BUS) != secbus {
            tracing::debug!(bdf = %bdf, "PCI: secondary bus -> {secbus:#x}");
            cfg.write_u8(bdf, PCI_SECONDARY_BUS, secbus);
        }

        // Open the full range while the subtree is numbered; narrowed below.
        let old_subbus = cfg.read_u8(bdf, PCI_SUBORDINATE_BUS);
        cfg.write_u8(bdf, PCI_SUBORDINATE_BUS, 255);

        init_bus_rec(cfg, secbus, pci_bus);

        let mut subbus = *pci_bus;
        let cap = find_resource_reserve_capability(cfg, bdf);
        if cap != 0 {
            if let Some(raw) = ResourceReserve::read(cfg, bdf, cap).bus {
                let res_bus = (raw & 0xff) as u8;
                match secbus.checked_add(res_bus) {
                    Some(end) if end > subbus => {
                        tracing::debug!(bdf = %bdf, res_bus, "PCI: QEMU resource reserve cap: bus");
                        subbus = end;
                    }
                    Some(_) => {}
                    None => {
                        tracing::warn!(bdf = %bdf, res_bus, "PCI: bus_reserve value is invalid");
                    }
                }
            }
        }
        tracing::debug!(
            bdf = %bdf,
            "PCI: subordinate bus = {old_subbus:#x} -> {subbus:#x}"
        );
        *pci_bus = subbus;
        cfg.write_u8(bdf, PCI_SUBORDINATE_BUS, subbus);
    }
}
