//! PCI configuration space register layout used by the bring-up engine.

pub const PCI_VENDOR_ID: u8 = 0x00;
pub const PCI_DEVICE_ID: u8 = 0x02;
pub const PCI_COMMAND: u8 = 0x04;
pub const PCI_STATUS: u8 = 0x06;
pub const PCI_CLASS_REVISION: u8 = 0x08;
pub const PCI_REVISION_ID: u8 = 0x08;
pub const PCI_CLASS_DEVICE: u8 = 0x0a;
pub const PCI_HEADER_TYPE: u8 = 0x0e;
pub const PCI_BASE_ADDRESS_0: u8 = 0x10;
pub const PCI_ROM_ADDRESS: u8 = 0x30;
pub const PCI_CAPABILITY_LIST: u8 = 0x34;
pub const PCI_INTERRUPT_LINE: u8 = 0x3c;
pub const PCI_INTERRUPT_PIN: u8 = 0x3d;

pub const PCI_COMMAND_IO: u16 = 0x1;
pub const PCI_COMMAND_MEMORY: u16 = 0x2;
pub const PCI_COMMAND_MASTER: u16 = 0x4;
pub const PCI_COMMAND_SERR: u16 = 0x100;

pub const PCI_STATUS_CAP_LIST: u16 = 0x10;

pub const PCI_HEADER_TYPE_NORMAL: u8 = 0;
pub const PCI_HEADER_TYPE_BRIDGE: u8 = 1;
pub const PCI_HEADER_TYPE_CARDBUS: u8 = 2;
pub const PCI_HEADER_TYPE_MULTI_FUNCTION: u8 = 0x80;

pub const PCI_BASE_ADDRESS_SPACE_IO: u32 = 0x01;
pub const PCI_BASE_ADDRESS_MEM_TYPE_MASK: u32 = 0x06;
pub const PCI_BASE_ADDRESS_MEM_TYPE_64: u32 = 0x04;
pub const PCI_BASE_ADDRESS_MEM_PREFETCH: u32 = 0x08;
pub const PCI_BASE_ADDRESS_IO_MASK: u32 = !0x03;
pub const PCI_BASE_ADDRESS_MEM_MASK: u32 = !0x0f;
pub const PCI_ROM_ADDRESS_MASK: u32 = !0x7ff;

// Type 1 (bridge) header.
pub const PCI_PRIMARY_BUS: u8 = 0x18;
pub const PCI_SECONDARY_BUS: u8 = 0x19;
pub const PCI_SUBORDINATE_BUS: u8 = 0x1a;
pub const PCI_IO_BASE: u8 = 0x1c;
pub const PCI_IO_LIMIT: u8 = 0x1d;
pub const PCI_MEMORY_BASE: u8 = 0x20;
pub const PCI_MEMORY_LIMIT: u8 = 0x22;
pub const PCI_PREF_MEMORY_BASE: u8 = 0x24;
pub const PCI_PREF_MEMORY_LIMIT: u8 = 0x26;
pub const PCI_PREF_BASE_UPPER32: u8 = 0x28;
pub const PCI_PREF_LIMIT_UPPER32: u8 = 0x2c;
pub const PCI_IO_BASE_UPPER16: u8 = 0x30;
pub const PCI_IO_LIMIT_UPPER16: u8 = 0x32;
pub const PCI_ROM_ADDRESS1: u8 = 0x38;
pub const PCI_BRIDGE_CONTROL: u8 = 0x3e;

pub const PCI_PREF_RANGE_TYPE_MASK: u32 = 0x0f;
pub const PCI_PREF_RANGE_TYPE_64: u32 = 0x01;

pub const PCI_BRIDGE_CTL_SERR: u16 = 0x02;
pub const PCI_BRIDGE_CTL_VGA: u16 = 0x08;

// Capability list.
pub const PCI_CAP_LIST_NEXT: u8 = 1;
pub const PCI_CAP_ID_VNDR: u8 = 0x09;
pub const PCI_CAP_ID_SHPC: u8 = 0x0c;
pub const PCI_CAP_ID_EXP: u8 = 0x10;

pub const PCI_EXP_FLAGS: u8 = 2;
pub const PCI_EXP_FLAGS_TYPE: u16 = 0x00f0;
pub const PCI_EXP_FLAGS_SLOT: u16 = 0x0100;
pub const PCI_EXP_TYPE_ROOT_PORT: u16 = 0x4;
pub const PCI_EXP_TYPE_DOWNSTREAM: u16 = 0x6;

// Class codes (base class << 8 | subclass).
pub const PCI_CLASS_STORAGE_IDE: u16 = 0x0101;
pub const PCI_CLASS_DISPLAY_VGA: u16 = 0x0300;
pub const PCI_CLASS_BRIDGE_HOST: u16 = 0x0600;
pub const PCI_CLASS_BRIDGE_ISA: u16 = 0x0601;
pub const PCI_CLASS_BRIDGE_PCI: u16 = 0x0604;
pub const PCI_CLASS_SYSTEM_PIC: u16 = 0x0800;
pub const PCI_CLASS_SERIAL_USB: u16 = 0x0c03;
pub const PCI_CLASS_SERIAL_SMBUS: u16 = 0x0c05;
pub const PCI_CLASS_BRIDGE_OTHER: u16 = 0x0680;
pub const PCI_CLASS_OTHERS: u16 = 0xff00;

pub const PCI_VENDOR_ID_INTEL: u16 = 0x8086;
pub const PCI_VENDOR_ID_IBM: u16 = 0x1014;
pub const PCI_VENDOR_ID_APPLE: u16 = 0x106b;
pub const PCI_VENDOR_ID_REDHAT: u16 = 0x1b36;

pub const PCI_DEVICE_ID_INTEL_82441: u16 = 0x1237;
pub const PCI_DEVICE_ID_INTEL_82371SB_0: u16 = 0x7000;
pub const PCI_DEVICE_ID_INTEL_82371SB_1: u16 = 0x7010;
pub const PCI_DEVICE_ID_INTEL_82371AB_0: u16 = 0x7110;
pub const PCI_DEVICE_ID_INTEL_82371AB: u16 = 0x7111;
pub const PCI_DEVICE_ID_INTEL_82371AB_3: u16 = 0x7113;
pub const PCI_DEVICE_ID_INTEL_Q35_MCH: u16 = 0x29c0;
pub const PCI_DEVICE_ID_INTEL_ICH9_LPC: u16 = 0x2918;
pub const PCI_DEVICE_ID_INTEL_ICH9_SMBUS: u16 = 0x2930;
pub const PCI_DEVICE_ID_IBM_OPENPIC2: u16 = 0xffff;
pub const PCI_DEVICE_ID_IBM_MPIC2: u16 = 0x0046;
pub const PCI_DEVICE_ID_APPLE_UNI_N_KEYL: u16 = 0x0022;
pub const PCI_DEVICE_ID_APPLE_MAC_IO: u16 = 0x0017;
pub const PCI_DEVICE_ID_REDHAT_BRIDGE: u16 = 0x0001;
pub const PCI_DEVICE_ID_REDHAT_ROOT_PORT: u16 = 0x000c;

/// Wildcard for vendor/device matches in the quirk tables.
pub const PCI_ANY_ID: u16 = !0;

/// Vendor capability type byte identifying a resource reserve record.
pub const REDHAT_CAP_RESOURCE_RESERVE: u8 = 1;
pub const REDHAT_CAP_TYPE_OFFSET: u8 = 3;
pub const RES_RESERVE_CAP_SIZE: u8 = 0x14 + 12;
pub const RES_RESERVE_BUS_RES: u8 = 4;
pub const RES_RESERVE_IO: u8 = 8;
pub const RES_RESERVE_MEM: u8 = 16;
pub const RES_RESERVE_PREF_MEM_32: u8 = 20;
pub const RES_RESERVE_PREF_MEM_64: u8 = 24;

// Q35 MCH.
pub const Q35_HOST_BRIDGE_PCIEXBAR: u8 = 0x60;
pub const Q35_HOST_BRIDGE_PCIEXBAREN: u32 = 1;

// PIIX3/PIIX4 and ICH9 function registers.
pub const PIIX_PIRQC: u8 = 0x60;
pub const PIIX_IDETIM_PRIMARY: u8 = 0x40;
pub const PIIX_IDETIM_SECONDARY: u8 = 0x42;
pub const PIIX_IDETIM_IDE_DECODE_ENABLE: u16 = 0x8000;
pub const PIIX_PMBA: u8 = 0x40;
pub const PIIX_PMREGMISC: u8 = 0x80;
pub const PIIX_SMBHSTBASE: u8 = 0x90;
pub const PIIX_SMBHSTCFG: u8 = 0xd2;

pub const ICH9_LPC_PIRQA_ROUT: u8 = 0x60;
pub const ICH9_LPC_PIRQE_ROUT: u8 = 0x68;
pub const ICH9_LPC_PMBASE: u8 = 0x40;
pub const ICH9_LPC_ACPI_CTRL: u8 = 0x44;
pub const ICH9_LPC_ACPI_CTRL_ACPI_EN: u8 = 0x80;
pub const ICH9_LPC_RCBA: u8 = 0xf0;
pub const ICH9_LPC_RCBA_EN: u32 = 0x1;
pub const ICH9_SMB_SMB_BASE: u8 = 0x20;
pub const ICH9_SMB_HOSTC: u8 = 0x40;
pub const ICH9_SMB_HOSTC_HST_EN: u8 = 0x01;

pub const ICH9_PMIO_PM1_CNT: u16 = 0x04;
pub const ICH9_PMIO_PM1_TMR: u16 = 0x08;
pub const PIIX4_PMIO_PM1_CNT: u16 = 0x04;
pub const PIIX4_PMIO_PM1_TMR: u16 = 0x08;
