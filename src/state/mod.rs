//! Machine-state data model and the declarative state specification format.
//!
//! A [`PartialStateSpec`] names any subset of registers, flags and memory
//! cells; it seeds a run (`<name>_init.txt`) or describes what a run should end
//! with (`<name>_expect.txt`). A [`MachineState`] is the observed result of a
//! run, restricted to an [`ObservationSet`] of memory addresses.

mod parser;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub use parser::{load, parse};

/// Memory addresses the comparator is allowed to inspect.
pub type ObservationSet = BTreeSet<u16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Register {
    A,
    X,
    Y,
}

impl Register {
    /// Comparison and serialization order.
    pub const ALL: [Register; 3] = [Register::A, Register::X, Register::Y];

    pub fn from_name(name: &str) -> Option<Register> {
        match name.to_ascii_uppercase().as_str() {
            "A" => Some(Register::A),
            "X" => Some(Register::X),
            "Y" => Some(Register::Y),
            _ => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::A => write!(f, "A"),
            Register::X => write!(f, "X"),
            Register::Y => write!(f, "Y"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flag {
    /// Carry
    C,
    /// Negative
    N,
    /// Zero
    Z,
    /// Overflow
    V,
}

impl Flag {
    /// Comparison and serialization order.
    pub const ALL: [Flag; 4] = [Flag::C, Flag::N, Flag::Z, Flag::V];

    pub fn from_name(name: &str) -> Option<Flag> {
        match name.to_ascii_uppercase().as_str() {
            "C" => Some(Flag::C),
            "N" => Some(Flag::N),
            "Z" => Some(Flag::Z),
            "V" => Some(Flag::V),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::C => write!(f, "C"),
            Flag::N => write!(f, "N"),
            Flag::Z => write!(f, "Z"),
            Flag::V => write!(f, "V"),
        }
    }
}

/// Observable state of the CPU after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub carry: bool,
    pub negative: bool,
    pub zero: bool,
    pub overflow: bool,
    /// Only the addresses that were asked for.
    pub memory: BTreeMap<u16, u8>,
}

impl MachineState {
    pub fn register(&self, register: Register) -> u8 {
        match register {
            Register::A => self.a,
            Register::X => self.x,
            Register::Y => self.y,
        }
    }

    pub fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::C => self.carry,
            Flag::N => self.negative,
            Flag::Z => self.zero,
            Flag::V => self.overflow,
        }
    }

    /// Reads an observed cell. Cells that were never observed read as zero.
    pub fn memory_at(&self, addr: u16) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    pub a: Option<u8>,
    pub x: Option<u8>,
    pub y: Option<u8>,
}

impl RegisterSpec {
    pub fn get(&self, register: Register) -> Option<u8> {
        match register {
            Register::A => self.a,
            Register::X => self.x,
            Register::Y => self.y,
        }
    }

    pub fn slot(&mut self, register: Register) -> &mut Option<u8> {
        match register {
            Register::A => &mut self.a,
            Register::X => &mut self.x,
            Register::Y => &mut self.y,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSpec {
    pub c: Option<bool>,
    pub n: Option<bool>,
    pub z: Option<bool>,
    pub v: Option<bool>,
}

impl FlagSpec {
    pub fn get(&self, flag: Flag) -> Option<bool> {
        match flag {
            Flag::C => self.c,
            Flag::N => self.n,
            Flag::Z => self.z,
            Flag::V => self.v,
        }
    }

    pub fn slot(&mut self, flag: Flag) -> &mut Option<bool> {
        match flag {
            Flag::C => &mut self.c,
            Flag::N => &mut self.n,
            Flag::Z => &mut self.z,
            Flag::V => &mut self.v,
        }
    }
}

/// A machine state where every field is optional.
///
/// Absent fields are neither initialized nor asserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialStateSpec {
    pub registers: RegisterSpec,
    pub flags: FlagSpec,
    pub memory: BTreeMap<u16, u8>,
}

impl PartialStateSpec {
    pub fn is_empty(&self) -> bool {
        Register::ALL.iter().all(|r| self.registers.get(*r).is_none())
            && Flag::ALL.iter().all(|f| self.flags.get(*f).is_none())
            && self.memory.is_empty()
    }
}

/// Renders the spec in the same text format [`parse`] reads.
impl fmt::Display for PartialStateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registers: Vec<_> = Register::ALL
            .iter()
            .filter_map(|r| self.registers.get(*r).map(|v| (r, v)))
            .collect();
        if !registers.is_empty() {
            writeln!(f, "[registers]")?;
            for (register, value) in registers {
                writeln!(f, "{register} = {value:#04x}")?;
            }
        }

        let flags: Vec<_> = Flag::ALL
            .iter()
            .filter_map(|fl| self.flags.get(*fl).map(|v| (fl, v)))
            .collect();
        if !flags.is_empty() {
            writeln!(f, "[flags]")?;
            for (flag, value) in flags {
                writeln!(f, "{flag} = {}", u8::from(value))?;
            }
        }

        if !self.memory.is_empty() {
            writeln!(f, "[memory]")?;
            for (addr, value) in &self.memory {
                writeln!(f, "{addr:#06x} = {value:#04x}")?;
            }
        }
        Ok(())
    }
}

/// Union of the memory addresses named by the init and expectation specs.
pub fn observation_set(
    init: Option<&PartialStateSpec>,
    expect: Option<&PartialStateSpec>,
) -> ObservationSet {
    init.into_iter()
        .chain(expect)
        .flat_map(|spec| spec.memory.keys().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_set_is_union_of_both_specs() {
        let mut init = PartialStateSpec::default();
        init.memory.insert(0x10, 1);
        let mut expect = PartialStateSpec::default();
        expect.memory.insert(0x20, 2);

        let set = observation_set(Some(&init), Some(&expect));
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![0x10, 0x20]);
        assert!(observation_set(None, None).is_empty());
        assert_eq!(observation_set(None, Some(&expect)).len(), 1);
    }

    #[test]
    fn serialized_spec_parses_back_identically() {
        let mut spec = PartialStateSpec::default();
        spec.registers.a = Some(0x05);
        spec.registers.y = Some(0xFF);
        spec.flags.c = Some(true);
        spec.flags.v = Some(false);
        spec.memory.insert(0x0200, 0xFF);
        spec.memory.insert(0x0010, 0x00);

        let text = spec.to_string();
        assert_eq!(parse(&text).unwrap(), spec);
    }

    #[test]
    fn empty_spec_serializes_to_nothing() {
        let spec = PartialStateSpec::default();
        assert!(spec.is_empty());
        assert_eq!(spec.to_string(), "");
        assert_eq!(parse("").unwrap(), spec);
    }

    #[test]
    fn unobserved_memory_reads_as_zero() {
        let mut state = MachineState::default();
        state.memory.insert(0x10, 0x7F);
        assert_eq!(state.memory_at(0x10), 0x7F);
        assert_eq!(state.memory_at(0x11), 0);
    }
}
