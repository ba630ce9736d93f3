//! 6502-family emulator the driver runs fixtures on.
//!
//! The engine only talks to it through [`Machine`]: register, flag and memory
//! access plus a single-step primitive.

mod cpu;
mod errors;
mod memory;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::state::{Flag, Register};
use cpu::registers::StatusFlag;
use cpu::Cpu;
use memory::MemoryBus;

pub use errors::CpuError;

pub const MEM_SIZE: usize = 0x10000;
pub const RTS_OPCODE: u8 = 0x60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuVariant {
    #[default]
    #[serde(rename = "6502")]
    Nmos6502,
    #[serde(rename = "65c02")]
    Cmos65C02,
}

impl CpuVariant {
    pub fn name(&self) -> &'static str {
        match self {
            CpuVariant::Nmos6502 => "6502",
            CpuVariant::Cmos65C02 => "65c02",
        }
    }

    pub fn is_default(&self) -> bool {
        *self == CpuVariant::Nmos6502
    }
}

impl fmt::Display for CpuVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CpuVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "6502" => Ok(CpuVariant::Nmos6502),
            "65c02" => Ok(CpuVariant::Cmos65C02),
            other => Err(format!("unsupported cpu '{other}' (expected 6502 or 65c02)")),
        }
    }
}

/// What the driver needs from an emulator.
pub trait Machine {
    fn register(&self, register: Register) -> u8;
    fn set_register(&mut self, register: Register, value: u8);
    fn flag(&self, flag: Flag) -> bool;
    fn set_flag(&mut self, flag: Flag, value: bool);
    fn read(&self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
    fn pc(&self) -> u16;
    fn set_pc(&mut self, pc: u16);
    /// Executes one instruction, returning the cycles it took.
    fn step(&mut self) -> Result<u32, CpuError>;
}

pub struct Emulator {
    cpu: Cpu,
    memory: MemoryBus,
}

impl Emulator {
    pub fn new(variant: CpuVariant, trace: bool) -> Emulator {
        Emulator {
            cpu: Cpu::new(variant, trace),
            memory: MemoryBus::new(),
        }
    }

    /// Copies a binary image into memory without recording it as written.
    pub fn load_image(&mut self, addr: u16, image: &[u8]) {
        self.memory.load(addr, image);
    }

    /// Addresses written by executed instructions.
    pub fn written(&self) -> &BTreeSet<u16> {
        self.memory.written()
    }

    pub fn memory_image(&self) -> &[u8] {
        self.memory.bytes()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.cpu.call_log()
    }
}

fn status_flag(flag: Flag) -> StatusFlag {
    match flag {
        Flag::C => StatusFlag::Carry,
        Flag::N => StatusFlag::Negative,
        Flag::Z => StatusFlag::Zero,
        Flag::V => StatusFlag::Overflow,
    }
}

impl Machine for Emulator {
    fn register(&self, register: Register) -> u8 {
        match register {
            Register::A => self.cpu.reg.a,
            Register::X => self.cpu.reg.x,
            Register::Y => self.cpu.reg.y,
        }
    }

    fn set_register(&mut self, register: Register, value: u8) {
        match register {
            Register::A => self.cpu.reg.a = value,
            Register::X => self.cpu.reg.x = value,
            Register::Y => self.cpu.reg.y = value,
        }
    }

    fn flag(&self, flag: Flag) -> bool {
        self.cpu.reg.flag(status_flag(flag))
    }

    fn set_flag(&mut self, flag: Flag, value: bool) {
        self.cpu.reg.set_flag(status_flag(flag), value)
    }

    fn read(&self, addr: u16) -> u8 {
        self.memory.read_u8(addr)
    }

    /// Setup write; not recorded as touched by the program.
    fn write(&mut self, addr: u16, value: u8) {
        self.memory.poke(addr, value)
    }

    fn pc(&self) -> u16 {
        self.cpu.pc
    }

    fn set_pc(&mut self, pc: u16) {
        self.cpu.pc = pc
    }

    fn step(&mut self) -> Result<u32, CpuError> {
        self.cpu.execute_next_opcode(&mut self.memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_variant_names() {
        assert_eq!("6502".parse::<CpuVariant>(), Ok(CpuVariant::Nmos6502));
        assert_eq!("65C02".parse::<CpuVariant>(), Ok(CpuVariant::Cmos65C02));
        assert!("65816".parse::<CpuVariant>().is_err());
    }

    #[test]
    fn flags_map_onto_status_register() {
        let mut emulator = Emulator::new(CpuVariant::Nmos6502, false);
        emulator.set_flag(Flag::C, true);
        emulator.set_flag(Flag::N, true);
        assert_eq!(emulator.cpu.reg.p, 0x30 | 0x01 | 0x80);
        emulator.set_flag(Flag::C, false);
        assert!(!emulator.flag(Flag::C));
        assert!(emulator.flag(Flag::N));
    }

    #[test]
    fn setup_writes_are_not_tracked() {
        let mut emulator = Emulator::new(CpuVariant::Nmos6502, false);
        emulator.write(0x0200, 0xFF);
        // STA $0201
        emulator.load_image(0x1000, &[0x8d, 0x01, 0x02]);
        emulator.set_pc(0x1000);
        emulator.step().unwrap();
        assert_eq!(emulator.written().iter().copied().collect::<Vec<_>>(), vec![0x0201]);
        assert_eq!(emulator.read(0x0200), 0xFF);
    }
}
