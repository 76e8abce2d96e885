use super::capabilities::{
    PciCapability, PCI_CAP_PTR_OFFSET, PCI_CONFIG_SPACE_SIZE, PCI_STATUS_CAPABILITIES_LIST,
    PCI_STATUS_OFFSET,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PciBarDefinition {
    Io { size: u32 },
    Mmio32 { size: u32, prefetchable: bool },
    Mmio64 { size: u64, prefetchable: bool },
}

impl PciBarDefinition {
    pub fn size(&self) -> u64 {
        match self {
            Self::Io { size } => u64::from(*size),
            Self::Mmio32 { size, .. } => u64::from(*size),
            Self::Mmio64 { size, .. } => *size,
        }
    }

    /// Writable address bits and hardwired flag bits of the low register.
    fn low_mask_and_flags(&self) -> (u32, u32) {
        match *self {
            Self::Io { size } => (!(size.saturating_sub(1)) & 0xFFFF_FFFC, 0x1),
            Self::Mmio32 { size, prefetchable } => (
                !(size.saturating_sub(1)) & 0xFFFF_FFF0,
                if prefetchable { 1 << 3 } else { 0 },
            ),
            Self::Mmio64 { size, prefetchable } => (
                !(size.saturating_sub(1)) as u32 & 0xFFFF_FFF0,
                // bits 2:1 = 0b10 indicate 64-bit
                (0b10 << 1) | if prefetchable { 1 << 3 } else { 0 },
            ),
        }
    }
}

/// Prefetchable window support of a type 1 header.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum PciPrefWindow {
    /// Base/limit registers hardwired to zero.
    None,
    Bits32,
    #[default]
    Bits64,
}

/// Optional forwarding windows of a PCI-to-PCI bridge. Memory forwarding is always present.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciBridgeWindows {
    pub io: bool,
    pub pref: PciPrefWindow,
}

impl Default for PciBridgeWindows {
    fn default() -> Self {
        Self {
            io: true,
            pref: PciPrefWindow::Bits64,
        }
    }
}

/// 256-byte PCI configuration space for a type 0 (endpoint) or type 1 (bridge) header.
///
/// Every register is stored in its guest-visible form. Writes are filtered through per-register
/// masks the way real hardware does it: BARs keep only the address bits their size allows (so
/// writing all ones and reading back yields the size mask), unimplemented registers read as
/// zero, and read-only identification bytes ignore writes.
pub struct PciConfigSpace {
    bytes: [u8; PCI_CONFIG_SPACE_SIZE],
    capabilities: Vec<(u8, Box<dyn PciCapability>)>,
    next_cap_offset: u8,
    bars: [Option<PciBarDefinition>; 6],
    rom_size: u32,
    bridge: Option<PciBridgeWindows>,
}

impl PciConfigSpace {
    pub const COMMAND_OFFSET: u16 = 0x04;
    pub const INTERRUPT_LINE_OFFSET: u16 = 0x3C;
    pub const INTERRUPT_PIN_OFFSET: u16 = 0x3D;
    pub const HEADER_TYPE_OFFSET: u16 = 0x0E;
    pub const BRIDGE_CONTROL_OFFSET: u16 = 0x3E;

    /// Type 0 header.
    pub fn new(vendor_id: u16, device_id: u16) -> Self {
        let mut bytes = [0u8; PCI_CONFIG_SPACE_SIZE];
        bytes[0x00..0x02].copy_from_slice(&vendor_id.to_le_bytes());
        bytes[0x02..0x04].copy_from_slice(&device_id.to_le_bytes());

        Self {
            bytes,
            capabilities: Vec::new(),
            next_cap_offset: 0x40,
            bars: [None; 6],
            rom_size: 0,
            bridge: None,
        }
    }

    /// Type 1 header with class "PCI-to-PCI bridge".
    pub fn new_bridge(vendor_id: u16, device_id: u16, windows: PciBridgeWindows) -> Self {
        let mut cfg = Self::new(vendor_id, device_id);
        cfg.bytes[usize::from(Self::HEADER_TYPE_OFFSET)] = 0x01;
        cfg.set_class(0x0604, 0);
        cfg.bridge = Some(windows);
        if windows.pref == PciPrefWindow::Bits64 {
            cfg.bytes[0x24] = 0x01;
            cfg.bytes[0x26] = 0x01;
        }
        cfg
    }

    pub fn is_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn vendor_id(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x00], self.bytes[0x01]])
    }

    pub fn device_id(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x02], self.bytes[0x03]])
    }

    pub fn class(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0x0a], self.bytes[0x0b]])
    }

    /// Sets class/subclass (as one word) and programming interface.
    pub fn set_class(&mut self, class: u16, prog_if: u8) {
        self.bytes[0x09] = prog_if;
        self.bytes[0x0a..0x0c].copy_from_slice(&class.to_le_bytes());
    }

    pub fn header_type(&self) -> u8 {
        self.bytes[usize::from(Self::HEADER_TYPE_OFFSET)]
    }

    pub fn set_multifunction(&mut self, multifunction: bool) {
        let ht = &mut self.bytes[usize::from(Self::HEADER_TYPE_OFFSET)];
        if multifunction {
            *ht |= 0x80;
        } else {
            *ht &= !0x80;
        }
    }

    pub fn command(&self) -> u16 {
        self.read_u16(Self::COMMAND_OFFSET)
    }

    pub fn set_command(&mut self, command: u16) {
        self.bytes[0x04..0x06].copy_from_slice(&command.to_le_bytes());
    }

    pub fn bridge_control(&self) -> u16 {
        self.read_u16(Self::BRIDGE_CONTROL_OFFSET)
    }

    pub fn set_bridge_control(&mut self, ctl: u16) {
        self.bytes[0x3e..0x40].copy_from_slice(&ctl.to_le_bytes());
    }

    pub fn interrupt_line(&self) -> u8 {
        self.bytes[usize::from(Self::INTERRUPT_LINE_OFFSET)]
    }

    pub fn interrupt_pin(&self) -> u8 {
        self.bytes[usize::from(Self::INTERRUPT_PIN_OFFSET)]
    }

    pub fn set_interrupt_pin(&mut self, pin: u8) {
        // Interrupt Pin (0x3D) is read-only from the guest's perspective.
        self.bytes[usize::from(Self::INTERRUPT_PIN_OFFSET)] = pin;
    }

    pub fn primary_bus(&self) -> u8 {
        self.bytes[0x18]
    }

    pub fn secondary_bus(&self) -> u8 {
        self.bytes[0x19]
    }

    pub fn subordinate_bus(&self) -> u8 {
        self.bytes[0x1a]
    }

    fn num_bars(&self) -> usize {
        if self.is_bridge() {
            2
        } else {
            6
        }
    }

    fn rom_offset(&self) -> usize {
        if self.is_bridge() {
            0x38
        } else {
            0x30
        }
    }

    pub fn set_bar_definition(&mut self, index: u8, def: PciBarDefinition) {
        let index = usize::from(index);
        assert!(index < self.num_bars(), "BAR{index} not implemented by this header");
        assert!(def.size().is_power_of_two(), "PCI BAR size must be a power of two");
        if let PciBarDefinition::Mmio64 { .. } = def {
            assert!(index + 1 < self.num_bars(), "64-bit BAR must not be the last BAR");
            assert!(
                self.bars[index + 1].is_none(),
                "BAR{} overlaps 64-bit BAR{index}",
                index + 1
            );
        }
        if index > 0 {
            assert!(
                !matches!(self.bars[index - 1], Some(PciBarDefinition::Mmio64 { .. })),
                "BAR{index} overlaps 64-bit BAR{} high dword",
                index - 1
            );
        }

        self.bars[index] = Some(def);
        let (_, flags) = def.low_mask_and_flags();
        self.write_u32_to_bytes(0x10 + index * 4, flags);
        if let PciBarDefinition::Mmio64 { .. } = def {
            self.write_u32_to_bytes(0x10 + (index + 1) * 4, 0);
        }
    }

    pub fn bar_definition(&self, index: u8) -> Option<PciBarDefinition> {
        self.bars.get(usize::from(index)).copied().flatten()
    }

    /// Currently programmed base address of a defined BAR.
    pub fn bar_base(&self, index: u8) -> Option<u64> {
        let index = usize::from(index);
        let def = (*self.bars.get(index)?)?;
        let low = self.read_u32_from_bytes(0x10 + index * 4);
        Some(match def {
            PciBarDefinition::Io { .. } => u64::from(low & 0xFFFF_FFFC),
            PciBarDefinition::Mmio32 { .. } => u64::from(low & 0xFFFF_FFF0),
            PciBarDefinition::Mmio64 { .. } => {
                let high = self.read_u32_from_bytes(0x10 + (index + 1) * 4);
                u64::from(low & 0xFFFF_FFF0) | u64::from(high) << 32
            }
        })
    }

    /// Sets the expansion ROM size (0 = no ROM).
    pub fn set_rom_size(&mut self, size: u32) {
        assert!(size == 0 || (size.is_power_of_two() && size >= 0x800));
        self.rom_size = size;
        let off = self.rom_offset();
        self.write_u32_to_bytes(off, 0);
    }

    pub fn rom_base(&self) -> u32 {
        self.read_u32_from_bytes(self.rom_offset()) & !0x7ff
    }

    /// Decoded I/O forwarding window `[base, limit]`, if the limit is not below the base.
    pub fn io_window(&self) -> Option<(u64, u64)> {
        if !self.bridge?.io {
            return None;
        }
        let base = u64::from(self.bytes[0x1c] & 0xf0) << 8;
        let limit = (u64::from(self.bytes[0x1d] & 0xf0) << 8) | 0xfff;
        (base <= limit).then_some((base, limit))
    }

    pub fn mem_window(&self) -> Option<(u64, u64)> {
        self.bridge?;
        let base = u64::from(self.read_u16(0x20) & 0xfff0) << 16;
        let limit = (u64::from(self.read_u16(0x22) & 0xfff0) << 16) | 0xf_ffff;
        (base <= limit).then_some((base, limit))
    }

    pub fn pref_window(&self) -> Option<(u64, u64)> {
        if self.bridge?.pref == PciPrefWindow::None {
            return None;
        }
        let upper_base = u64::from(self.read_u32_from_bytes(0x28));
        let upper_limit = u64::from(self.read_u32_from_bytes(0x2c));
        let base = (u64::from(self.read_u16(0x24) & 0xfff0) << 16) | upper_base << 32;
        let limit = (u64::from(self.read_u16(0x26) & 0xfff0) << 16) | 0xf_ffff | upper_limit << 32;
        (base <= limit).then_some((base, limit))
    }

    pub fn add_capability(&mut self, capability: Box<dyn PciCapability>) -> u8 {
        let offset = self.next_cap_offset;
        let next = (usize::from(offset) + usize::from(capability.len()) + 3) & !3;
        assert!(next <= PCI_CONFIG_SPACE_SIZE, "capability list overflows config space");
        self.next_cap_offset = next as u8;

        let base = usize::from(offset);
        self.bytes[base] = capability.id();
        self.bytes[base + 1] = 0;
        match self.capabilities.last() {
            Some((prev, _)) => self.bytes[usize::from(*prev) + 1] = offset,
            None => {
                self.bytes[PCI_CAP_PTR_OFFSET] = offset;
                let status = self.read_u16(PCI_STATUS_OFFSET as u16) | PCI_STATUS_CAPABILITIES_LIST;
                self.bytes[PCI_STATUS_OFFSET..PCI_STATUS_OFFSET + 2]
                    .copy_from_slice(&status.to_le_bytes());
            }
        }
        capability.sync_to_config(offset, &mut self.bytes);
        self.capabilities.push((offset, capability));
        offset
    }

    /// Rewrites the next pointer of the capability at `offset`, for modelling broken lists.
    pub fn set_capability_next(&mut self, offset: u8, next: u8) {
        self.bytes[usize::from(offset) + 1] = next;
    }

    pub fn read(&self, offset: u16, size: usize) -> u32 {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        if offset + size > PCI_CONFIG_SPACE_SIZE {
            return 0xFFFF_FFFF;
        }
        let mut value = 0u32;
        for i in 0..size {
            value |= u32::from(self.bytes[offset + i]) << (8 * i);
        }
        value
    }

    pub fn write(&mut self, offset: u16, size: usize, value: u32) {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        if offset + size > PCI_CONFIG_SPACE_SIZE {
            return;
        }

        let mut i = 0;
        while i < size {
            let addr = offset + i;
            let aligned = addr & !3;
            let old = self.read_u32_from_bytes(aligned);
            let mut new = old;
            // Merge the bytes of this access that fall into the dword.
            while i < size && (offset + i) & !3 == aligned {
                let shift = 8 * ((offset + i) & 3);
                let byte = (value >> (8 * i)) & 0xff;
                new = (new & !(0xff << shift)) | (byte << shift);
                i += 1;
            }
            let mask = self.writable_mask(aligned);
            let result = (old & !mask) | (new & mask);
            self.write_u32_to_bytes(aligned, result);
        }
    }

    /// Bits of the dword at `aligned` that accept writes. Hardwired bits keep whatever the
    /// model stored in them.
    fn writable_mask(&self, aligned: usize) -> u32 {
        match aligned {
            // Vendor/device, class/revision.
            0x00 | 0x08 => 0,
            // Command; the status register is device managed.
            0x04 => 0x0000_FFFF,
            // Header type is read-only.
            0x0c => 0xFF00_FFFF,
            0x10..=0x27 => {
                let index = (aligned - 0x10) / 4;
                if index < self.num_bars() {
                    return self.bar_mask(index);
                }
                match (aligned, self.bridge) {
                    (0x18, Some(_)) => 0xFFFF_FFFF,
                    (0x1c, Some(w)) if w.io => 0x0000_F0F0,
                    (0x20, Some(_)) => 0xFFF0_FFF0,
                    (0x24, Some(w)) if w.pref != PciPrefWindow::None => 0xFFF0_FFF0,
                    _ => 0,
                }
            }
            0x28 | 0x2c => match self.bridge {
                Some(w) if w.pref == PciPrefWindow::Bits64 => 0xFFFF_FFFF,
                _ => 0,
            },
            // I/O upper 16 bits: only 16-bit I/O decoding is modelled.
            0x30 if self.is_bridge() => 0,
            0x30 | 0x38 if aligned == self.rom_offset() => {
                if self.rom_size == 0 {
                    0
                } else {
                    (!(self.rom_size - 1) & 0xFFFF_F800) | 1
                }
            }
            0x34 | 0x38 => 0,
            // Interrupt line (and bridge control on type 1 headers).
            0x3c if self.is_bridge() => 0xFFFF_00FF,
            0x3c => 0x0000_00FF,
            _ => self.device_specific_mask(aligned),
        }
    }

    fn bar_mask(&self, index: usize) -> u32 {
        if let Some(def) = self.bars[index] {
            return def.low_mask_and_flags().0;
        }
        match index.checked_sub(1).and_then(|low| self.bars[low]) {
            Some(PciBarDefinition::Mmio64 { size, .. }) => (!(size.saturating_sub(1)) >> 32) as u32,
            _ => 0,
        }
    }

    /// Device-specific area: writable except for capability structures.
    fn device_specific_mask(&self, aligned: usize) -> u32 {
        let mut mask = 0u32;
        for byte in 0..4 {
            let addr = aligned + byte;
            let in_cap = self.capabilities.iter().any(|(off, cap)| {
                let start = usize::from(*off);
                (start..start + usize::from(cap.len())).contains(&addr)
            });
            if !in_cap {
                mask |= 0xff << (8 * byte);
            }
        }
        mask
    }

    fn read_u16(&self, offset: u16) -> u16 {
        let off = usize::from(offset);
        u16::from_le_bytes([self.bytes[off], self.bytes[off + 1]])
    }

    fn read_u32_from_bytes(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ])
    }

    fn write_u32_to_bytes(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}
