//! PCI bring-up: topology discovery, resource sizing, window allocation and device programming.
//!
//! The entry point is [`pci_setup`]. Everything else in this module is the machinery it
//! drives; the pieces are public so boot code and tests can reuse individual steps (for
//! example [`PciConfig`] for ad-hoc config accesses after setup has completed).

mod alloc;
mod bar;
mod bridge;
mod capability;
mod config;
mod device;
mod error;
mod map;
mod numbering;
mod platform;
mod quirks;
mod region;
pub mod regs;
mod setup;

pub use alloc::PciWindow;
pub use bar::{bar_offset, BarProbe};
pub use capability::ResourceReserve;
pub use config::PciConfig;
pub use device::{DeviceId, PciDevice, PciDevices};
pub use error::PciSetupError;
pub use map::MappedRegion;
pub use platform::{IrqRouting, PCI_IRQS, PCI_IRQ_UNKNOWN};
pub use quirks::{PciDeviceId, PciInitFn};
pub use region::{BarSlot, PciRegionType, Region, RegionEntry};
pub use setup::{
    pci_resume, pci_setup, PciLayout, PciResumeState, PciSetup, PciSetupConfig, SetupPhase,
};

use core::fmt;

/// Bus/device/function address packed the way configuration mechanism #1 expects it
/// (bus in bits 8..=15, device in 3..=7, function in 0..=2).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PciBdf(pub u16);

impl PciBdf {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self(((bus as u16) << 8) | (((device & 0x1f) as u16) << 3) | (function & 0x7) as u16)
    }

    pub const fn bus(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn device(self) -> u8 {
        ((self.0 >> 3) & 0x1f) as u8
    }

    pub const fn function(self) -> u8 {
        (self.0 & 0x7) as u8
    }

    /// Device/function part only, as used by slot-based IRQ routing.
    pub const fn devfn(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl From<PciBdf> for u16 {
    fn from(value: PciBdf) -> Self {
        value.0
    }
}

impl From<u16> for PciBdf {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for PciBdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{:x}",
            self.bus(),
            self.device(),
            self.function()
        )
    }
}

/// Rounds `val` up to a power-of-two `align`.
pub(crate) fn align_up(val: u64, align: u64) -> u64 {
    let mask = align.wrapping_sub(1);
    val.wrapping_add(mask) & !mask
}

/// Rounds `val` down to a power-of-two `align`.
pub(crate) fn align_down(val: u64, align: u64) -> u64 {
    val & !align.wrapping_sub(1)
}
