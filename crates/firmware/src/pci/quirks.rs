//! Vendor/device/class match tables and the per-device fix-ups dispatched through them.

use vbios_pc_constants::{ELCR1_PORT, ELCR2_PORT, ICH9_RCBA_ADDR, ICH9_RCBA_SIZE};

use super::bar::set_bar_address;
use super::config::PciConfig;
use super::device::{DeviceId, PciDevice};
use super::platform::PCI_IRQS;
use super::region::BarSlot;
use super::regs::*;
use super::setup::PciSetup;
use super::PciBdf;
use crate::e820::{E820Type, MemoryMap};

/// Callback invoked for a matching device.
pub type PciInitFn = for<'s, 'a> fn(&'s mut PciSetup<'a>, DeviceId);

/// One match rule. `PCI_ANY_ID` matches any vendor/device; the class only has to agree on
/// the bits set in `class_mask`.
#[derive(Clone, Copy)]
pub struct PciDeviceId {
    pub vendid: u16,
    pub devid: u16,
    pub class: u16,
    pub class_mask: u16,
    pub func: PciInitFn,
}

impl PciDeviceId {
    pub const fn device(vendid: u16, devid: u16, func: PciInitFn) -> Self {
        Self {
            vendid,
            devid,
            class: PCI_ANY_ID,
            class_mask: 0,
            func,
        }
    }

    pub const fn class(vendid: u16, devid: u16, class: u16, func: PciInitFn) -> Self {
        Self {
            vendid,
            devid,
            class,
            class_mask: !0,
            func,
        }
    }

    pub fn matches(&self, dev: &PciDevice) -> bool {
        (self.vendid == PCI_ANY_ID || self.vendid == dev.vendor)
            && (self.devid == PCI_ANY_ID || self.devid == dev.device)
            && (self.class ^ dev.class) & self.class_mask == 0
    }
}

impl core::fmt::Debug for PciDeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PciDeviceId")
            .field("vendid", &format_args!("{:04x}", self.vendid))
            .field("devid", &format_args!("{:04x}", self.devid))
            .field("class", &format_args!("{:04x}", self.class))
            .field("class_mask", &format_args!("{:04x}", self.class_mask))
            .finish()
    }
}

/// Runs the first rule of `ids` matching device `id`. Returns whether one matched.
pub(crate) fn init_device(ids: &[PciDeviceId], s: &mut PciSetup<'_>, id: DeviceId) -> bool {
    let Some(rule) = ids.iter().find(|r| r.matches(&s.devices[id])) else {
        return false;
    };
    (rule.func)(s, id);
    true
}

/// Level-triggered ELCR bits for the PCI IRQs.
fn pci_irq_elcr() -> [u8; 2] {
    let mut elcr = [0u8; 2];
    for irq in PCI_IRQS {
        elcr[usize::from(irq >> 3)] |= 1 << (irq & 7);
    }
    elcr
}

/// PIIX3/PIIX4 PCI to ISA bridge.
fn piix_isa_bridge_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let bdf = s.devices[id].bdf;
    for (i, irq) in PCI_IRQS.into_iter().enumerate() {
        s.cfg.write_u8(bdf, PIIX_PIRQC + i as u8, irq);
    }
    let elcr = pci_irq_elcr();
    s.cfg.platform().io_write_u8(ELCR1_PORT, elcr[0]);
    s.cfg.platform().io_write_u8(ELCR2_PORT, elcr[1]);
    tracing::debug!("PIIX3/PIIX4 init: elcr={:02x} {:02x}", elcr[0], elcr[1]);
}

pub(crate) fn mch_isa_lpc_setup(cfg: &mut PciConfig<'_>, bdf: PciBdf, acpi_pm_base: u16) {
    cfg.write_u32(bdf, ICH9_LPC_PMBASE, u32::from(acpi_pm_base) | 1);
    // ACPI enable, SCI on IRQ 9.
    cfg.write_u8(bdf, ICH9_LPC_ACPI_CTRL, ICH9_LPC_ACPI_CTRL_ACPI_EN);
    cfg.write_u32(bdf, ICH9_LPC_RCBA, ICH9_RCBA_ADDR as u32 | ICH9_LPC_RCBA_EN);
}

/// ICH9 LPC bridge.
fn mch_isa_bridge_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let bdf = s.devices[id].bdf;
    for (i, irq) in PCI_IRQS.into_iter().enumerate() {
        s.cfg.write_u8(bdf, ICH9_LPC_PIRQA_ROUT + i as u8, irq);
        s.cfg.write_u8(bdf, ICH9_LPC_PIRQE_ROUT + i as u8, irq);
    }
    let elcr = pci_irq_elcr();
    s.cfg.platform().io_write_u8(ELCR1_PORT, elcr[0]);
    s.cfg.platform().io_write_u8(ELCR2_PORT, elcr[1]);
    tracing::debug!("Q35 LPC init: elcr={:02x} {:02x}", elcr[0], elcr[1]);

    s.resume.ich9_lpc = Some(bdf);
    let pm_base = s.config.acpi_pm_base;
    mch_isa_lpc_setup(&mut s.cfg, bdf, pm_base);
    s.e820.add(ICH9_RCBA_ADDR, ICH9_RCBA_SIZE, E820Type::Reserved);

    s.acpi_pm1a_cnt = Some(pm_base + ICH9_PMIO_PM1_CNT);
    s.pmtimer_port = Some(pm_base + ICH9_PMIO_PM1_TMR);
}

/// IDE controllers are left in legacy ISA compatible mode.
fn storage_ide_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    const LEGACY_PORTS: [u64; 4] = [0x1f0, 0x3f4, 0x170, 0x374];
    let dev = &s.devices[id];
    for (bar, port) in LEGACY_PORTS.into_iter().enumerate() {
        set_bar_address(&mut s.cfg, dev, BarSlot::Bar(bar as u8), port, false);
    }
}

/// PIIX3/PIIX4 IDE: enable both channel decoders.
fn piix_ide_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let bdf = s.devices[id].bdf;
    s.cfg
        .write_u16(bdf, PIIX_IDETIM_PRIMARY, PIIX_IDETIM_IDE_DECODE_ENABLE);
    s.cfg
        .write_u16(bdf, PIIX_IDETIM_SECONDARY, PIIX_IDETIM_IDE_DECODE_ENABLE);
}

fn pic_ibm_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let dev = &s.devices[id];
    set_bar_address(&mut s.cfg, dev, BarSlot::Bar(0), 0x8080_0000 + 0x0004_0000, false);
}

fn apple_macio_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let dev = &s.devices[id];
    set_bar_address(&mut s.cfg, dev, BarSlot::Bar(0), 0x8080_0000, false);
}

pub(crate) fn piix4_pm_config_setup(cfg: &mut PciConfig<'_>, bdf: PciBdf, acpi_pm_base: u16) {
    cfg.write_u8(bdf, PCI_INTERRUPT_LINE, 9);
    cfg.write_u32(bdf, PIIX_PMBA, u32::from(acpi_pm_base) | 1);
    // PM I/O space enable.
    cfg.write_u8(bdf, PIIX_PMREGMISC, 0x01);
    cfg.write_u32(bdf, PIIX_SMBHSTBASE, (u32::from(acpi_pm_base) + 0x100) | 1);
    // SMBus I/O space enable.
    cfg.write_u8(bdf, PIIX_SMBHSTCFG, 0x09);
}

/// PIIX4 power management function (ACPI).
fn piix4_pm_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let bdf = s.devices[id].bdf;
    let pm_base = s.config.acpi_pm_base;
    s.resume.piix4_pm = Some(bdf);
    piix4_pm_config_setup(&mut s.cfg, bdf, pm_base);

    s.acpi_pm1a_cnt = Some(pm_base + PIIX4_PMIO_PM1_CNT);
    s.pmtimer_port = Some(pm_base + PIIX4_PMIO_PM1_TMR);
}

pub(crate) fn ich9_smbus_enable(cfg: &mut PciConfig<'_>, bdf: PciBdf, acpi_pm_base: u16) {
    cfg.write_u32(
        bdf,
        ICH9_SMB_SMB_BASE,
        (u32::from(acpi_pm_base) + 0x100) | PCI_BASE_ADDRESS_SPACE_IO,
    );
    cfg.write_u8(bdf, ICH9_SMB_HOSTC, ICH9_SMB_HOSTC_HST_EN);
}

fn ich9_smbus_setup(s: &mut PciSetup<'_>, id: DeviceId) {
    let bdf = s.devices[id].bdf;
    s.resume.ich9_smbus = Some(bdf);
    let pm_base = s.config.acpi_pm_base;
    ich9_smbus_enable(&mut s.cfg, bdf, pm_base);
}

pub(crate) static PCI_DEVICE_TBL: &[PciDeviceId] = &[
    // PIIX3/PIIX4 PCI to ISA bridge.
    PciDeviceId::device(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_82371SB_0,
        piix_isa_bridge_setup,
    ),
    PciDeviceId::device(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_82371AB_0,
        piix_isa_bridge_setup,
    ),
    PciDeviceId::device(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_ICH9_LPC,
        mch_isa_bridge_setup,
    ),
    // Storage IDE.
    PciDeviceId::class(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_82371SB_1,
        PCI_CLASS_STORAGE_IDE,
        piix_ide_setup,
    ),
    PciDeviceId::class(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_82371AB,
        PCI_CLASS_STORAGE_IDE,
        piix_ide_setup,
    ),
    PciDeviceId::class(PCI_ANY_ID, PCI_ANY_ID, PCI_CLASS_STORAGE_IDE, storage_ide_setup),
    // IBM MPIC and MPIC2.
    PciDeviceId::class(
        PCI_VENDOR_ID_IBM,
        PCI_DEVICE_ID_IBM_MPIC2,
        PCI_CLASS_SYSTEM_PIC,
        pic_ibm_setup,
    ),
    PciDeviceId::class(
        PCI_VENDOR_ID_IBM,
        PCI_DEVICE_ID_IBM_OPENPIC2,
        PCI_CLASS_SYSTEM_PIC,
        pic_ibm_setup,
    ),
    PciDeviceId::device(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_82371AB_3,
        piix4_pm_setup,
    ),
    PciDeviceId::device(
        PCI_VENDOR_ID_INTEL,
        PCI_DEVICE_ID_INTEL_ICH9_SMBUS,
        ich9_smbus_setup,
    ),
    PciDeviceId::class(
        PCI_VENDOR_ID_APPLE,
        PCI_DEVICE_ID_APPLE_MAC_IO,
        PCI_CLASS_OTHERS,
        apple_macio_setup,
    ),
    PciDeviceId::class(
        PCI_VENDOR_ID_APPLE,
        PCI_DEVICE_ID_APPLE_UNI_N_KEYL,
        PCI_CLASS_OTHERS,
        apple_macio_setup,
    ),
];
