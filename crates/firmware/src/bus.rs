/// Hardware access used by the PCI bring-up engine.
///
/// Port I/O and physical memory accesses are sized (1, 2 or 4 bytes) and must reach the
/// hardware as a single transaction: configuration mechanism #1 latches a full dword written
/// to `0xCF8`, and composing it from byte writes would hit unrelated ports (`0xCF9` is the
/// reset control register).
pub trait PlatformBus {
    fn io_read(&mut self, port: u16, size: u8) -> u32;
    fn io_write(&mut self, port: u16, size: u8, value: u32);

    fn mmio_read(&mut self, paddr: u64, size: u8) -> u32;
    fn mmio_write(&mut self, paddr: u64, size: u8, value: u32);

    fn io_read_u8(&mut self, port: u16) -> u8 {
        self.io_read(port, 1) as u8
    }

    fn io_write_u8(&mut self, port: u16, val: u8) {
        self.io_write(port, 1, u32::from(val));
    }

    fn io_read_u16(&mut self, port: u16) -> u16 {
        self.io_read(port, 2) as u16
    }

    fn io_write_u16(&mut self, port: u16, val: u16) {
        self.io_write(port, 2, u32::from(val));
    }

    fn io_read_u32(&mut self, port: u16) -> u32 {
        self.io_read(port, 4)
    }

    fn io_write_u32(&mut self, port: u16, val: u32) {
        self.io_write(port, 4, val);
    }
}
