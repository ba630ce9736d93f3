use std::collections::BTreeSet;

use super::MEM_SIZE;

/// Flat 64 KiB address space.
///
/// Writes made by executing instructions are recorded so the harness can tell
/// which cells a run touched. Setup writes go through [`MemoryBus::poke`] and
/// [`MemoryBus::load`] and are not recorded.
pub struct MemoryBus {
    bytes: Vec<u8>,
    written: BTreeSet<u16>,
}

impl MemoryBus {
    pub fn new() -> Self {
        MemoryBus {
            bytes: vec![0; MEM_SIZE],
            written: BTreeSet::new(),
        }
    }

    /// Copies `image` in starting at `addr`, wrapping at the top of memory.
    pub fn load(&mut self, addr: u16, image: &[u8]) {
        for (offset, byte) in image.iter().enumerate() {
            let target = addr.wrapping_add(offset as u16);
            self.bytes[target as usize] = *byte;
        }
    }

    pub fn read_u8(&self, addr: u16) -> u8 {
        self.bytes[addr as usize]
    }

    pub fn write_u8(&mut self, addr: u16, value: u8) {
        self.bytes[addr as usize] = value;
        self.written.insert(addr);
    }

    pub fn poke(&mut self, addr: u16, value: u8) {
        self.bytes[addr as usize] = value;
    }

    pub fn read_u16(&self, addr: u16) -> u16 {
        let lo = self.read_u8(addr) as u16;
        let hi = self.read_u8(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Reads a pointer without leaving the zero page.
    pub fn read_u16_zero_page(&self, zp: u8) -> u16 {
        let lo = self.read_u8(zp as u16) as u16;
        let hi = self.read_u8(zp.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    pub fn written(&self) -> &BTreeSet<u16> {
        &self.written
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        MemoryBus::new()
    }
}
