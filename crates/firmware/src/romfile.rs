//! Named configuration blobs handed to the firmware by the host (fw_cfg style).

use std::collections::BTreeMap;

/// Read-only access to host-provided configuration files.
pub trait RomFile {
    /// Raw contents of `name`, if present.
    fn find(&self, name: &str) -> Option<&[u8]>;

    /// Reads `name` as a little-endian integer of 1 to 8 bytes. Missing files and files of any
    /// other length yield `default`.
    fn load_int(&self, name: &str, default: u64) -> u64 {
        let Some(data) = self.find(name) else {
            return default;
        };
        if data.is_empty() || data.len() > 8 {
            tracing::warn!(name, len = data.len(), "romfile: unexpected integer size");
            return default;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        u64::from_le_bytes(buf)
    }
}

/// In-memory file set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RomFiles {
    files: BTreeMap<String, Vec<u8>>,
}

impl RomFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }

    /// Stores `value` as an 8-byte little-endian file.
    pub fn insert_int(&mut self, name: impl Into<String>, value: u64) {
        self.insert(name, value.to_le_bytes().to_vec());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl RomFile for RomFiles {
    fn find(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_default() {
        let files = RomFiles::new();
        assert_eq!(files.load_int("etc/extra-pci-roots", 3), 3);
    }

    #[test]
    fn short_integers_are_zero_extended() {
        let mut files = RomFiles::new();
        files.insert("etc/extra-pci-roots", [2u8, 0]);
        files.insert_int("etc/reserved-memory-end", 0x1_2000_0000);
        assert_eq!(files.load_int("etc/extra-pci-roots", 0), 2);
        assert_eq!(files.load_int("etc/reserved-memory-end", 0), 0x1_2000_0000);
    }

    #[test]
    fn oversized_blob_is_ignored() {
        let mut files = RomFiles::new();
        files.insert("etc/extra-pci-roots", vec![1u8; 9]);
        assert_eq!(files.load_int("etc/extra-pci-roots", 7), 7);
    }
}
