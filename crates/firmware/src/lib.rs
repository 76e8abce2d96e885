#![forbid(unsafe_code)]

//! PCI bring-up for legacy PC firmware.
//!
//! The engine discovers every PCI function behind the host bridge, numbers the bridges,
//! sizes all decoders, places the I/O, 32-bit and 64-bit windows and programs the result
//! back into the hardware. All hardware access goes through [`bus::PlatformBus`], so the
//! whole pipeline also runs host-side against emulated devices.

pub mod bus;
pub mod e820;
pub mod pci;
pub mod romfile;

pub use pci::{pci_resume, pci_setup, PciLayout, PciSetupConfig, PciSetupError};
