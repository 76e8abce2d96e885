//! Host bridge specific setup, run between topology discovery and allocation.

use vbios_pc_constants::{PCIE_MMCONFIG_BASE, PCIE_MMCONFIG_SIZE};

use super::config::PciConfig;
use super::device::{DeviceId, PciDevices};
use super::quirks::PciDeviceId;
use super::regs::*;
use super::setup::PciSetup;
use super::PciBdf;
use crate::e820::{E820Type, MemoryMap};

/// Legacy IRQs behind PIRQ A-D.
pub const PCI_IRQS: [u8; 4] = [10, 10, 11, 11];

/// Interrupt Line value meaning "unknown / not connected" on x86.
pub const PCI_IRQ_UNKNOWN: u8 = 0xff;

/// Slot to PIRQ swizzle used to fill in Interrupt Line registers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IrqRouting {
    /// No supported host bridge found.
    #[default]
    Unknown,
    /// i440FX/PIIX: rotation by slot number starting at slot 1.
    Piix,
    /// Q35/ICH9: slots 0-24 rotate by slot, 25-31 share the LNKA mapping.
    Mch,
}

impl IrqRouting {
    /// Legacy IRQ for interrupt `pin` (1 = INTA#) of device `id`.
    pub fn slot_get_irq(self, devices: &PciDevices, id: DeviceId, pin: u8) -> u8 {
        // Walk up to the root bus, accumulating the device numbers of the bridges on the way.
        let mut addend = 0u32;
        let mut cur = id;
        while let Some(parent) = devices[cur].parent {
            addend += u32::from(devices[cur].bdf.device());
            cur = parent;
        }
        let slot = u32::from(devices[cur].bdf.device());
        let pin = u32::from(pin).wrapping_sub(1);

        let idx = match self {
            Self::Unknown => {
                tracing::debug!("pci_slot_get_irq called with unknown routing");
                return PCI_IRQ_UNKNOWN;
            }
            Self::Piix => pin.wrapping_add(addend).wrapping_add(slot).wrapping_sub(1),
            Self::Mch if slot <= 24 => pin.wrapping_add(addend).wrapping_add(slot),
            Self::Mch => pin.wrapping_add(addend),
        };
        PCI_IRQS[(idx & 3) as usize]
    }
}

fn i440fx_mem_addr_setup(s: &mut PciSetup<'_>, _id: DeviceId) {
    if s.config.ram_size <= 0x8000_0000 {
        s.pcimem_start = 0x8000_0000;
    } else if s.config.ram_size <= 0xc000_0000 {
        s.pcimem_start = 0xc000_0000;
    }
    s.irq_routing = IrqRouting::Piix;
}

/// Programs PCIEXBAR and switches config access to the memory-mapped window.
pub(crate) fn mch_mmconfig_setup(cfg: &mut PciConfig<'_>, bdf: PciBdf) {
    let addr = PCIE_MMCONFIG_BASE;
    let upper = (addr >> 32) as u32;
    let lower = (addr as u32) | Q35_HOST_BRIDGE_PCIEXBAREN;
    cfg.write_u32(bdf, Q35_HOST_BRIDGE_PCIEXBAR, 0);
    cfg.write_u32(bdf, Q35_HOST_BRIDGE_PCIEXBAR + 4, upper);
    cfg.write_u32(bdf, Q35_HOST_BRIDGE_PCIEXBAR, lower);
    cfg.enable_mmconfig(addr, "q35");
}

fn mch_mem_addr_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let bdf = s.devices[id].bdf;
    s.resume.mch = Some(bdf);
    mch_mmconfig_setup(&mut s.cfg, bdf);
    s.e820
        .add(PCIE_MMCONFIG_BASE, PCIE_MMCONFIG_SIZE, E820Type::Reserved);

    // The 32-bit PCI window starts right above the config window.
    s.pcimem_start = PCIE_MMCONFIG_BASE + PCIE_MMCONFIG_SIZE;
    s.irq_routing = IrqRouting::Mch;

    let pm_base = u64::from(s.config.acpi_pm_base);
    s.pci_io_low_end = if pm_base < 0x1000 { 0x10000 } else { pm_base };
}

pub(crate) static PCI_PLATFORM_TBL: &[PciDeviceId] = &[
    PciDeviceId::device(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_82441,
        i440fx_mem_addr_setup,
    ),
    PciDeviceId::device(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_Q35_MCH,
        mch_mem_addr_setup,
    ),
];
