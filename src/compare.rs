//! Structured diff of two machine states.

use std::fmt;

use serde::Serialize;

use crate::state::{Flag, MachineState, ObservationSet, PartialStateSpec, Register};

/// Where two states disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Register(Register),
    Flag(Flag),
    Memory(u16),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(register) => write!(f, "{register}"),
            Location::Flag(flag) => write!(f, "Flag {flag}"),
            Location::Memory(addr) => write!(f, "Memory[0x{addr:04X}]"),
        }
    }
}

impl Location {
    fn render(&self, value: u8) -> String {
        match self {
            Location::Flag(_) => value.to_string(),
            _ => format!("0x{value:02X}"),
        }
    }
}

/// Original and optimized runs ended with different values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub location: Location,
    pub original: u8,
    pub optimized: u8,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: original={}, optimized={}",
            self.location,
            self.location.render(self.original),
            self.location.render(self.optimized)
        )
    }
}

/// A run ended with a value other than the one the expectation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Deviation {
    pub location: Location,
    pub expected: u8,
    pub actual: u8,
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected={}, actual={}",
            self.location,
            self.location.render(self.expected),
            self.location.render(self.actual)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonVerdict {
    pub mismatches: Vec<Mismatch>,
}

impl ComparisonVerdict {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compares registers A, X, Y, then flags C, N, Z, V, then the observed
/// memory cells in ascending address order.
pub fn compare(
    original: &MachineState,
    optimized: &MachineState,
    observation: &ObservationSet,
) -> ComparisonVerdict {
    let mut mismatches = Vec::new();
    let mut check = |location, original: u8, optimized: u8| {
        if original != optimized {
            mismatches.push(Mismatch {
                location,
                original,
                optimized,
            });
        }
    };

    for register in Register::ALL {
        check(
            Location::Register(register),
            original.register(register),
            optimized.register(register),
        );
    }
    for flag in Flag::ALL {
        check(
            Location::Flag(flag),
            u8::from(original.flag(flag)),
            u8::from(optimized.flag(flag)),
        );
    }
    for addr in observation {
        check(
            Location::Memory(*addr),
            original.memory_at(*addr),
            optimized.memory_at(*addr),
        );
    }

    ComparisonVerdict { mismatches }
}

/// Checks every field `expect` names against `actual`, in comparison order.
pub fn check_expectation(actual: &MachineState, expect: &PartialStateSpec) -> Vec<Deviation> {
    let mut deviations = Vec::new();
    let mut check = |location, expected: u8, actual: u8| {
        if expected != actual {
            deviations.push(Deviation {
                location,
                expected,
                actual,
            });
        }
    };

    for register in Register::ALL {
        if let Some(expected) = expect.registers.get(register) {
            check(Location::Register(register), expected, actual.register(register));
        }
    }
    for flag in Flag::ALL {
        if let Some(expected) = expect.flags.get(flag) {
            check(
                Location::Flag(flag),
                u8::from(expected),
                u8::from(actual.flag(flag)),
            );
        }
    }
    for (addr, expected) in &expect.memory {
        check(Location::Memory(*addr), *expected, actual.memory_at(*addr));
    }

    deviations
}
