pub const PCI_CONFIG_SPACE_SIZE: usize = 256;
pub const PCI_STATUS_OFFSET: usize = 0x06;
pub const PCI_CAP_PTR_OFFSET: usize = 0x34;
pub const PCI_STATUS_CAPABILITIES_LIST: u16 = 1 << 4;
pub const PCI_CAP_ID_VENDOR_SPECIFIC: u8 = 0x09;
pub const PCI_CAP_ID_SHPC: u8 = 0x0c;
pub const PCI_CAP_ID_EXP: u8 = 0x10;

/// A capability structure in the standard list. The model owns the two header bytes (ID and
/// next pointer); implementations render everything after them.
pub trait PciCapability {
    fn id(&self) -> u8;
    /// Total length including the two header bytes.
    fn len(&self) -> u8;

    fn sync_to_config(&self, offset: u8, config: &mut [u8; PCI_CONFIG_SPACE_SIZE]);
}

#[derive(Debug, Clone)]
pub struct VendorSpecificCapability {
    payload: Vec<u8>,
}

impl VendorSpecificCapability {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl PciCapability for VendorSpecificCapability {
    fn id(&self) -> u8 {
        PCI_CAP_ID_VENDOR_SPECIFIC
    }

    fn len(&self) -> u8 {
        u8::try_from(2 + self.payload.len()).expect("vendor capability too large for config space")
    }

    fn sync_to_config(&self, offset: u8, config: &mut [u8; PCI_CONFIG_SPACE_SIZE]) {
        let base = usize::from(offset);
        config[base + 2..base + 2 + self.payload.len()].copy_from_slice(&self.payload);
    }
}

/// Resource reservation hints QEMU attaches to its generic bridges and root ports.
///
/// `None` fields are rendered as the all-ones "not set" marker.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct QemuResourceReserve {
    pub bus: Option<u32>,
    pub io: Option<u64>,
    pub mem: Option<u32>,
    pub pref32: Option<u32>,
    pub pref64: Option<u64>,
}

impl QemuResourceReserve {
    /// Length byte of a well-formed capability.
    pub const LEN: u8 = 32;
    const TYPE_RESOURCE_RESERVE: u8 = 1;

    /// Vendor capability with the given length byte (tests use a short one to model a
    /// truncated structure).
    pub fn capability_with_len(&self, len: u8) -> VendorSpecificCapability {
        let mut payload = Vec::with_capacity(30);
        payload.push(len);
        payload.push(Self::TYPE_RESOURCE_RESERVE);
        payload.extend_from_slice(&self.bus.unwrap_or(u32::MAX).to_le_bytes());
        payload.extend_from_slice(&self.io.unwrap_or(u64::MAX).to_le_bytes());
        payload.extend_from_slice(&self.mem.unwrap_or(u32::MAX).to_le_bytes());
        payload.extend_from_slice(&self.pref32.unwrap_or(u32::MAX).to_le_bytes());
        payload.extend_from_slice(&self.pref64.unwrap_or(u64::MAX).to_le_bytes());
        VendorSpecificCapability::new(payload)
    }

    pub fn capability(&self) -> VendorSpecificCapability {
        self.capability_with_len(Self::LEN)
    }
}

/// PCI Express capability; only the flags word is modelled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PciExpressCapability {
    pub port_type: u8,
    pub slot_implemented: bool,
}

impl PciExpressCapability {
    pub const TYPE_ENDPOINT: u8 = 0x0;
    pub const TYPE_ROOT_PORT: u8 = 0x4;
    pub const TYPE_UPSTREAM: u8 = 0x5;
    pub const TYPE_DOWNSTREAM: u8 = 0x6;

    pub fn root_port(slot_implemented: bool) -> Self {
        Self {
            port_type: Self::TYPE_ROOT_PORT,
            slot_implemented,
        }
    }

    fn flags(&self) -> u16 {
        let mut flags = 0x2 | (u16::from(self.port_type & 0xf) << 4);
        if self.slot_implemented {
            flags |= 1 << 8;
        }
        flags
    }
}

impl PciCapability for PciExpressCapability {
    fn id(&self) -> u8 {
        PCI_CAP_ID_EXP
    }

    fn len(&self) -> u8 {
        0x3c
    }

    fn sync_to_config(&self, offset: u8, config: &mut [u8; PCI_CONFIG_SPACE_SIZE]) {
        let base = usize::from(offset);
        config[base + 2..base + 4].copy_from_slice(&self.flags().to_le_bytes());
    }
}

/// Standard hot-plug controller capability (register contents not modelled).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShpcCapability;

impl PciCapability for ShpcCapability {
    fn id(&self) -> u8 {
        PCI_CAP_ID_SHPC
    }

    fn len(&self) -> u8 {
        8
    }

    fn sync_to_config(&self, _offset: u8, _config: &mut [u8; PCI_CONFIG_SPACE_SIZE]) {}
}
