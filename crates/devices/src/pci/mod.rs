//! Emulated PCI hardware: config-space model, bridge routing and the two config access paths.

pub mod capabilities;
pub mod config;

mod bus;
mod ecam;
mod platform;
mod ports;

pub use bus::{PciBus, PciSegmentId};
pub use capabilities::{
    PciCapability, PciExpressCapability, QemuResourceReserve, ShpcCapability,
    VendorSpecificCapability,
};
pub use config::{PciBarDefinition, PciBridgeWindows, PciConfigSpace, PciPrefWindow};
pub use ecam::PciEcam;
pub use platform::{IoWrite, PciPlatform};
pub use ports::PciConfigMechanism1;

/// PCI bus/device/function identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PciBdf {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciBdf {
    /// Creates a new BDF.
    ///
    /// The caller is responsible for ensuring the values are within the PCI ranges:
    /// bus < 256, device < 32, function < 8.
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    /// Packs this BDF using the config-address bit layout (bus 8..=15, device 3..=7,
    /// function 0..=2).
    pub const fn pack_u16(self) -> u16 {
        ((self.bus as u16) << 8) | (((self.device & 0x1f) as u16) << 3) | (self.function & 7) as u16
    }

    pub const fn unpack_u16(v: u16) -> Self {
        Self {
            bus: (v >> 8) as u8,
            device: ((v >> 3) & 0x1f) as u8,
            function: (v & 0x7) as u8,
        }
    }
}

impl From<PciBdf> for u16 {
    fn from(value: PciBdf) -> Self {
        value.pack_u16()
    }
}

impl From<u16> for PciBdf {
    fn from(value: u16) -> Self {
        Self::unpack_u16(value)
    }
}

impl core::cmp::Ord for PciBdf {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.bus, self.device, self.function).cmp(&(other.bus, other.device, other.function))
    }
}

impl core::cmp::PartialOrd for PciBdf {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::PciBdf;

    #[test]
    fn pack_matches_config_address_layout() {
        let bdf = PciBdf::new(3, 0x1f, 7);
        assert_eq!(bdf.pack_u16(), 0x03ff);
        assert_eq!(PciBdf::from(0x03ffu16), bdf);
    }
}
