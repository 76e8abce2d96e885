use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PciSetupError {
    #[error("PCI: out of I/O address space (demand {demand:#x})")]
    OutOfIoSpace { demand: u64 },

    #[error("PCI: out of 32bit address space (window {start:#x}..{end:#x})")]
    OutOf32BitSpace { start: u64, end: u64 },

    #[error("PCI: out of memory allocating {0}")]
    NoMemory(&'static str),
}

impl PciSetupError {
    /// Address space exhaustion: the machine cannot boot with this device population.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfIoSpace { .. } | Self::OutOf32BitSpace { .. })
    }
}
