#![forbid(unsafe_code)]

//! Shared physical address / port constants for the legacy PC platform.
//!
//! This crate exists so the PCI bring-up engine (`vbios-firmware`) and the emulated
//! hardware it is tested against (`vbios-devices`) agree on addresses that must match
//! exactly at runtime.

/// PCI configuration mechanism #1 address (CONFIG_ADDRESS) port.
pub const PCI_CFG_ADDR_PORT: u16 = 0x0CF8;
/// PCI configuration mechanism #1 data (CONFIG_DATA) port.
pub const PCI_CFG_DATA_PORT: u16 = 0x0CFC;

/// Base physical address of the PCIe MMCONFIG window programmed into the Q35 PCIEXBAR.
///
/// This follows the QEMU Q35 convention (256MiB window at 0xB000_0000 covering buses 0..=255).
pub const PCIE_MMCONFIG_BASE: u64 = 0xB000_0000;

/// Number of bytes covered by one bus worth of MMCONFIG space.
///
/// 32 devices * 8 functions * 4KiB config space per function = 1MiB per bus.
pub const PCIE_MMCONFIG_BUS_STRIDE: u64 = 1 << 20;

/// Size of the MMCONFIG window in bytes (256 buses).
pub const PCIE_MMCONFIG_SIZE: u64 = 256 * PCIE_MMCONFIG_BUS_STRIDE;

/// Default start of the 32-bit PCI memory window when no platform hook narrows it.
pub const PCI_MEM_START_DEFAULT: u64 = 0xE000_0000;

/// End of the 32-bit PCI memory window (exclusive).
///
/// This is kept right below the IOAPIC MMIO base (`0xFEC0_0000`) so the PCI window does not
/// overlap fixed chipset MMIO ranges.
pub const PCI_MEM_END: u64 = 0xFEC0_0000;

/// End (exclusive) of the low PCI I/O range on i440FX-style machines.
///
/// `0xA000..0xAFFF` holds ACPI hotplug registers and must stay clear.
pub const PCI_IO_LOW_END_DEFAULT: u64 = 0xA000;

/// Default ACPI PM I/O base programmed into the PIIX4 PM / ICH9 LPC functions.
pub const ACPI_PM_BASE_DEFAULT: u16 = 0x0600;

/// ICH9 root complex register block.
pub const ICH9_RCBA_ADDR: u64 = 0xFED1_C000;
pub const ICH9_RCBA_SIZE: u64 = 16 * 1024;

/// Legacy 8259 edge/level control registers (PIIX and ICH9 share the ports).
pub const ELCR1_PORT: u16 = 0x04D0;
pub const ELCR2_PORT: u16 = 0x04D1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmconfig_defaults_follow_q35_convention() {
        assert_eq!(PCIE_MMCONFIG_BASE, 0xB000_0000);
        assert_eq!(PCIE_MMCONFIG_BUS_STRIDE, 1 << 20);
        assert_eq!(PCIE_MMCONFIG_SIZE, 0x1000_0000);
    }

    #[test]
    fn pci_window_sits_above_mmconfig_and_below_ioapic() {
        assert!(PCIE_MMCONFIG_BASE + PCIE_MMCONFIG_SIZE <= PCI_MEM_START_DEFAULT);
        assert_eq!(PCI_MEM_END, 0xFEC0_0000);
        assert!(ICH9_RCBA_ADDR >= PCI_MEM_END);
    }
}
