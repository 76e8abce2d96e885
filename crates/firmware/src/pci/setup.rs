//! The PCI bring-up pipeline.
//!
//! [`pci_setup`] runs the phases of [`SetupPhase`] in order against one [`PciSetup`]
//! context. Every phase has a single writer for the state it produces:
//!
//! - topology: bus numbers in the bridges, then the [`PciDevices`] set;
//! - platform pre-init: window bounds, IRQ routing, the MMCONFIG switch;
//! - requirement scan and allocation: the per-bus ledgers (local to the pipeline);
//! - mapping and programming: device registers only.

use core::fmt;

use vbios_pc_constants::{
    ACPI_PM_BASE_DEFAULT, PCI_IO_LOW_END_DEFAULT, PCI_MEM_END, PCI_MEM_START_DEFAULT,
};

use super::alloc::{allocate_root, PciWindow};
use super::bridge::{collect_bar_requirements, propagate_bridge_windows};
use super::config::PciConfig;
use super::device::{probe_devices, DeviceId, PciDevices};
use super::error::PciSetupError;
use super::map::{map_busses, map_entries, MappedRegion};
use super::numbering::init_bus;
use super::platform::{mch_mmconfig_setup, IrqRouting, PCI_PLATFORM_TBL};
use super::quirks::{
    ich9_smbus_enable, init_device, mch_isa_lpc_setup, piix4_pm_config_setup, PCI_DEVICE_TBL,
};
use super::region::PciBusRegions;
use super::regs::*;
use super::PciBdf;
use crate::bus::PlatformBus;
use crate::e820::{E820Type, MemoryMap};
use crate::romfile::RomFile;

/// Host provided inputs of a setup pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PciSetupConfig {
    /// RAM below 4GiB, in bytes.
    pub ram_size: u64,
    /// RAM above 4GiB, in bytes.
    pub ram_size_over_4g: u64,
    /// I/O base of the ACPI PM register block.
    pub acpi_pm_base: u16,
    /// Start of the 32-bit window when `ram_size` is 0.
    pub pcimem_start: u64,
    /// End (exclusive) of the 32-bit window.
    pub pcimem_end: u64,
    /// End (exclusive) of the low PCI I/O range.
    pub io_low_end: u64,
}

impl Default for PciSetupConfig {
    fn default() -> Self {
        Self {
            ram_size: 0,
            ram_size_over_4g: 0,
            acpi_pm_base: ACPI_PM_BASE_DEFAULT,
            pcimem_start: PCI_MEM_START_DEFAULT,
            pcimem_end: PCI_MEM_END,
            io_low_end: PCI_IO_LOW_END_DEFAULT,
        }
    }
}

/// Functions whose platform registers have to be restored after a resume from suspend.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PciResumeState {
    pub piix4_pm: Option<PciBdf>,
    pub ich9_lpc: Option<PciBdf>,
    pub ich9_smbus: Option<PciBdf>,
    pub mch: Option<PciBdf>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SetupPhase {
    HostProbe,
    Topology,
    PlatformPreinit,
    RequirementScan,
    Allocate,
    Map,
    ProgramDevices,
    QuirkDispatch,
    Done,
}

impl SetupPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::HostProbe => "host-probe",
            Self::Topology => "topology",
            Self::PlatformPreinit => "platform-preinit",
            Self::RequirementScan => "requirement-scan",
            Self::Allocate => "allocate",
            Self::Map => "map",
            Self::ProgramDevices => "program-devices",
            Self::QuirkDispatch => "quirk-dispatch",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State shared by the pipeline phases and the platform/device callbacks.
pub struct PciSetup<'a> {
    pub cfg: PciConfig<'a>,
    pub devices: PciDevices,
    pub config: PciSetupConfig,
    pub e820: &'a mut dyn MemoryMap,
    pub romfile: &'a dyn RomFile,
    pub phase: SetupPhase,
    pub pcimem_start: u64,
    pub pcimem_end: u64,
    pub pci_io_low_end: u64,
    pub irq_routing: IrqRouting,
    /// ACPI PM1a control port, once a PM function has been configured.
    pub acpi_pm1a_cnt: Option<u16>,
    /// ACPI PM timer port, once a PM function has been configured.
    pub pmtimer_port: Option<u16>,
    pub resume: PciResumeState,
}

/// Everything later boot stages need to know about the configured PCI hierarchy.
#[derive(Clone, Debug)]
pub struct PciLayout {
    pub devices: PciDevices,
    pub max_bus: u8,
    pub io: PciWindow,
    pub mem32: PciWindow,
    /// `None` when every request fit below 4GiB.
    pub mem64: Option<PciWindow>,
    pub mmconfig_base: Option<u64>,
    pub irq_routing: IrqRouting,
    pub acpi_pm1a_cnt: Option<u16>,
    pub pmtimer_port: Option<u16>,
    pub resume: PciResumeState,
    /// Every address assignment, in the order it was programmed.
    pub regions: Vec<MappedRegion>,
}

impl PciLayout {
    /// Assignments made for the function at `bdf`.
    pub fn regions_of(&self, bdf: PciBdf) -> impl Iterator<Item = &MappedRegion> + '_ {
        self.regions.iter().filter(move |r| r.bdf == bdf)
    }
}

impl<'a> PciSetup<'a> {
    fn enter(&mut self, phase: SetupPhase) -> tracing::span::EnteredSpan {
        self.phase = phase;
        tracing::info_span!("pci_setup", phase = %phase).entered()
    }

    fn for_each_device(&mut self, mut f: impl FnMut(&mut Self, DeviceId)) {
        for i in 0..self.devices.len() {
            f(self, DeviceId(i));
        }
    }

    /// IRQ line, decoding and SERR for one function.
    fn init_device_common(&mut self, id: DeviceId) {
        let dev = &self.devices[id];
        let (bdf, header_type) = (dev.bdf, dev.header_type);
        tracing::debug!(bdf = %bdf, "PCI: init");

        let pin = self.cfg.read_u8(bdf, PCI_INTERRUPT_PIN);
        if pin != 0 {
            let irq = self.irq_routing.slot_get_irq(&self.devices, id, pin);
            self.cfg.write_u8(bdf, PCI_INTERRUPT_LINE, irq);
        }

        self.cfg.mask_u16(
            bdf,
            PCI_COMMAND,
            0,
            PCI_COMMAND_IO | PCI_COMMAND_MEMORY | PCI_COMMAND_SERR,
        );
        if header_type & PCI_HEADER_TYPE_BRIDGE != 0 {
            self.cfg
                .mask_u16(bdf, PCI_BRIDGE_CONTROL, 0, PCI_BRIDGE_CTL_SERR);
        }
    }

    /// Whether `id` is a VGA controller that already decodes and is reachable through every
    /// bridge above it.
    fn is_active_vga(&mut self, id: DeviceId) -> bool {
        let dev = &self.devices[id];
        if dev.class != PCI_CLASS_DISPLAY_VGA {
            return false;
        }
        let cmd = self.cfg.read_u16(dev.bdf, PCI_COMMAND);
        if cmd & PCI_COMMAND_IO == 0 || cmd & PCI_COMMAND_MEMORY == 0 {
            return false;
        }
        let bridges: Vec<PciBdf> = self
            .devices
            .ancestors(id)
            .map(|p| self.devices[p].bdf)
            .collect();
        bridges
            .into_iter()
            .all(|bdf| self.cfg.read_u16(bdf, PCI_BRIDGE_CONTROL) & PCI_BRIDGE_CTL_VGA != 0)
    }

    fn enable_default_vga(&mut self) {
        for i in 0..self.devices.len() {
            let id = DeviceId(i);
            if self.is_active_vga(id) {
                tracing::info!(bdf = %self.devices[id].bdf, "PCI: Using device for primary VGA");
                return;
            }
        }

        let Some(id) = self.devices.find_class(PCI_CLASS_DISPLAY_VGA) else {
            tracing::debug!("PCI: No VGA devices found");
            return;
        };
        let bdf = self.devices[id].bdf;
        tracing::info!(bdf = %bdf, "PCI: Enabling device for primary VGA");
        self.cfg
            .mask_u16(bdf, PCI_COMMAND, 0, PCI_COMMAND_IO | PCI_COMMAND_MEMORY);

        let bridges: Vec<PciBdf> = self
            .devices
            .ancestors(id)
            .map(|p| self.devices[p].bdf)
            .collect();
        for bdf in bridges {
            tracing::debug!(bdf = %bdf, "PCI: Setting VGA enable on bridge");
            self.cfg
                .mask_u16(bdf, PCI_BRIDGE_CONTROL, 0, PCI_BRIDGE_CTL_VGA);
            self.cfg
                .mask_u16(bdf, PCI_COMMAND, 0, PCI_COMMAND_IO | PCI_COMMAND_MEMORY);
        }
    }
}

/// Discovers, sizes, places and programs every PCI function reachable from the host bridge.
///
/// Returns `Ok(None)` when no configuration mechanism #1 host answers. On error the
/// hierarchy is left partially programmed and the caller is expected to halt.
pub fn pci_setup<'a>(
    bus: &'a mut dyn PlatformBus,
    config: PciSetupConfig,
    e820: &'a mut dyn MemoryMap,
    romfile: &'a dyn RomFile,
) -> Result<Option<PciLayout>, PciSetupError> {
    let mut cfg = PciConfig::new(bus);
    {
        let _span = tracing::info_span!("pci_setup", phase = %SetupPhase::HostProbe).entered();
        if !cfg.probe_host() {
            return Ok(None);
        }
    }

    let devices = {
        let _span = tracing::info_span!("pci_setup", phase = %SetupPhase::Topology).entered();
        tracing::info!("=== PCI bus & bridge init ===");
        let extraroots = romfile.load_int("etc/extra-pci-roots", 0);
        if extraroots != 0 {
            tracing::debug!(extraroots, "PCI: extra root buses");
        }
        let last_bus = init_bus(&mut cfg, extraroots);
        tracing::debug!(last_bus, "PCI: bus numbering done");
        tracing::info!("=== PCI device probing ===");
        probe_devices(&mut cfg, extraroots)?
    };

    let mut s = PciSetup {
        cfg,
        devices,
        config,
        e820,
        romfile,
        phase: SetupPhase::Topology,
        pcimem_start: if config.ram_size == 0 {
            config.pcimem_start
        } else {
            config.ram_size
        },
        pcimem_end: config.pcimem_end,
        pci_io_low_end: config.io_low_end,
        irq_routing: IrqRouting::Unknown,
        acpi_pm1a_cnt: None,
        pmtimer_port: None,
        resume: PciResumeState::default(),
    };

    {
        let _span = s.enter(SetupPhase::PlatformPreinit);
        s.for_each_device(|s, id| {
            init_device(PCI_PLATFORM_TBL, s, id);
        });
        if s.irq_routing == IrqRouting::Unknown {
            tracing::warn!("PCI: no supported host bridge, interrupt lines left unrouted");
        }
    }

    let mut busses: Vec<PciBusRegions> = Vec::new();
    {
        let _span = s.enter(SetupPhase::RequirementScan);
        tracing::info!("=== PCI new allocation pass #1 ===");
        let count = usize::from(s.devices.max_bus()) + 1;
        busses
            .try_reserve_exact(count)
            .map_err(|_| PciSetupError::NoMemory("pci bus table"))?;
        busses.resize_with(count, PciBusRegions::default);
        collect_bar_requirements(&mut s.cfg, &s.devices, &mut busses)?;
        propagate_bridge_windows(&mut s.cfg, &s.devices, &mut busses)?;
    }

    let root = {
        let _span = s.enter(SetupPhase::Allocate);
        let reserved_end = s.romfile.load_int("etc/reserved-memory-end", 0);
        let mem64_floor = reserved_end.max((1u64 << 32) + s.config.ram_size_over_4g);
        allocate_root(
            &mut busses[0],
            &s.devices,
            s.pci_io_low_end,
            s.pcimem_start,
            s.pcimem_end,
            mem64_floor,
        )?
    };

    let mut regions = Vec::new();
    let mut mem64 = None;
    {
        let _span = s.enter(SetupPhase::Map);
        tracing::info!("=== PCI new allocation pass #2 ===");
        if let Some((window, [mut r64_mem, mut r64_pref])) = root.mem64 {
            for r in [&mut r64_mem, &mut r64_pref] {
                let base = r.base;
                let entries = r.take_entries();
                map_entries(&mut s.cfg, &s.devices, &mut busses, entries, base, &mut regions);
            }
            s.e820.add(window.start, window.len(), E820Type::Reserved);
            mem64 = Some(window);
        }
        map_busses(&mut s.cfg, &s.devices, &mut busses, &mut regions);
    }
    drop(busses);

    {
        let _span = s.enter(SetupPhase::ProgramDevices);
        s.for_each_device(PciSetup::init_device_common);
    }

    {
        let _span = s.enter(SetupPhase::QuirkDispatch);
        s.for_each_device(|s, id| {
            init_device(PCI_DEVICE_TBL, s, id);
        });
        s.enable_default_vga();
    }

    let _span = s.enter(SetupPhase::Done);
    Ok(Some(PciLayout {
        max_bus: s.devices.max_bus(),
        io: root.io,
        mem32: PciWindow {
            start: s.pcimem_start,
            end: s.pcimem_end,
        },
        mem64,
        mmconfig_base: s.cfg.mmconfig_base(),
        irq_routing: s.irq_routing,
        acpi_pm1a_cnt: s.acpi_pm1a_cnt,
        pmtimer_port: s.pmtimer_port,
        resume: s.resume,
        regions,
        devices: s.devices,
    }))
}

/// Restores the chipset registers programmed during setup after an S3 resume.
///
/// Starts from port-based config access; if the MCH was configured the returned accessor has
/// been switched back to MMCONFIG.
pub fn pci_resume<'a>(
    bus: &'a mut dyn PlatformBus,
    state: &PciResumeState,
    acpi_pm_base: u16,
) -> PciConfig<'a> {
    let mut cfg = PciConfig::new(bus);
    if let Some(bdf) = state.piix4_pm {
        piix4_pm_config_setup(&mut cfg, bdf, acpi_pm_base);
    }
    if let Some(bdf) = state.ich9_lpc {
        mch_isa_lpc_setup(&mut cfg, bdf, acpi_pm_base);
    }
    if let Some(bdf) = state.ich9_smbus {
        ich9_smbus_enable(&mut cfg, bdf, acpi_pm_base);
    }
    if let Some(bdf) = state.mch {
        mch_mmconfig_setup(&mut cfg, bdf);
    }
    cfg
}
