use super::config::PciConfig;
use super::device::PciDevice;
use super::region::{BarSlot, PciRegionType};
use super::regs::*;

/// Number of standard BARs on a type 0 header.
pub const PCI_NUM_BARS: u8 = 6;
/// Number of standard BARs on a type 1 (bridge) header.
pub const PCI_BRIDGE_NUM_BARS: u8 = 2;

/// Config space offset of a decoder. The expansion ROM register moves to `0x38` on bridges.
pub fn bar_offset(header_type: u8, slot: BarSlot) -> Option<u8> {
    match slot {
        BarSlot::Bar(i) if i < PCI_NUM_BARS => Some(PCI_BASE_ADDRESS_0 + i * 4),
        BarSlot::Bar(_) | BarSlot::BridgeWindow => None,
        BarSlot::Rom => {
            if header_type & !PCI_HEADER_TYPE_MULTI_FUNCTION == PCI_HEADER_TYPE_BRIDGE {
                Some(PCI_ROM_ADDRESS1)
            } else {
                Some(PCI_ROM_ADDRESS)
            }
        }
    }
}

/// Result of sizing one decoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BarProbe {
    pub kind: PciRegionType,
    /// Decoded size in bytes; 0 when the decoder is not implemented.
    pub size: u64,
    pub is64: bool,
}

/// Two's complement of the writable address bits of a sizing readback.
pub(crate) fn decode_size(val: u64, mask: u64, is64: bool) -> u64 {
    let size = (!(val & mask)).wrapping_add(1);
    if is64 {
        size
    } else {
        size & 0xffff_ffff
    }
}

/// Sizes a decoder by writing all ones and reading back the writable bits. The previous
/// register contents are restored afterwards.
pub(crate) fn probe_bar(cfg: &mut PciConfig<'_>, dev: &PciDevice, slot: BarSlot) -> BarProbe {
    let Some(ofs) = bar_offset(dev.header_type, slot) else {
        return BarProbe {
            kind: PciRegionType::Mem,
            size: 0,
            is64: false,
        };
    };
    let bdf = dev.bdf;
    let old = cfg.read_u32(bdf, ofs);

    let mut kind = PciRegionType::Mem;
    let mut is64 = false;
    let mut mask: u64;
    if slot == BarSlot::Rom {
        mask = u64::from(PCI_ROM_ADDRESS_MASK);
        cfg.write_u32(bdf, ofs, PCI_ROM_ADDRESS_MASK);
    } else {
        if old & PCI_BASE_ADDRESS_SPACE_IO != 0 {
            mask = u64::from(PCI_BASE_ADDRESS_IO_MASK);
            kind = PciRegionType::Io;
        } else {
            mask = u64::from(PCI_BASE_ADDRESS_MEM_MASK);
            if old & PCI_BASE_ADDRESS_MEM_PREFETCH != 0 {
                kind = PciRegionType::PrefMem;
            }
            is64 = old & PCI_BASE_ADDRESS_MEM_TYPE_MASK == PCI_BASE_ADDRESS_MEM_TYPE_64;
        }
        cfg.write_u32(bdf, ofs, !0);
    }
    let mut val = u64::from(cfg.read_u32(bdf, ofs));
    cfg.write_u32(bdf, ofs, old);

    if is64 {
        let hold = cfg.read_u32(bdf, ofs + 4);
        cfg.write_u32(bdf, ofs + 4, !0);
        let high = cfg.read_u32(bdf, ofs + 4);
        cfg.write_u32(bdf, ofs + 4, hold);
        val |= u64::from(high) << 32;
        mask |= 0xffff_ffff << 32;
    }

    BarProbe {
        kind,
        size: decode_size(val, mask, is64),
        is64,
    }
}

/// Programs a decoder; 64-bit decoders get the high half in the following register.
pub(crate) fn set_bar_address(
    cfg: &mut PciConfig<'_>,
    dev: &PciDevice,
    slot: BarSlot,
    addr: u64,
    is64: bool,
) {
    let Some(ofs) = bar_offset(dev.header_type, slot) else {
        return;
    };
    cfg.write_u32(dev.bdf, ofs, addr as u32);
    if is64 {
        cfg.write_u32(dev.bdf, ofs + 4, (addr >> 32) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_offset_depends_on_header_type() {
        assert_eq!(bar_offset(0x00, BarSlot::Rom), Some(0x30));
        assert_eq!(bar_offset(0x80, BarSlot::Rom), Some(0x30));
        assert_eq!(bar_offset(0x01, BarSlot::Rom), Some(0x38));
        assert_eq!(bar_offset(0x81, BarSlot::Rom), Some(0x38));
        assert_eq!(bar_offset(0x00, BarSlot::Bar(5)), Some(0x24));
        assert_eq!(bar_offset(0x00, BarSlot::BridgeWindow), None);
    }

    #[test]
    fn size_decoding() {
        // 32-bit memory BAR of 8KiB.
        assert_eq!(
            decode_size(0xffff_e000, u64::from(PCI_BASE_ADDRESS_MEM_MASK), false),
            0x2000
        );
        // I/O BAR of 32 ports.
        assert_eq!(
            decode_size(0xffff_ffe1, u64::from(PCI_BASE_ADDRESS_IO_MASK), false),
            0x20
        );
        // Unimplemented decoder.
        assert_eq!(decode_size(0, u64::from(PCI_BASE_ADDRESS_MEM_MASK), false), 0);
        // 64-bit memory BAR of 8GiB.
        let mask = u64::from(PCI_BASE_ADDRESS_MEM_MASK) | 0xffff_ffff << 32;
        assert_eq!(decode_size(0xffff_fffe_0000_000c, mask, true), 0x2_0000_0000);
    }
}
