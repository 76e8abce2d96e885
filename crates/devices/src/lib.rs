#![forbid(unsafe_code)]

//! Emulated PC hardware used to exercise the firmware host-side.

pub mod pci;
