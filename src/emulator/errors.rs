use thiserror::Error;

use super::CpuVariant;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU_ERROR: opcode {code:#04x} at {pc:#06x} is not a valid {variant} instruction")]
    UnrecognizedOpcode {
        code: u8,
        pc: u16,
        variant: CpuVariant,
    },
}
