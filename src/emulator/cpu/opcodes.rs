use std::collections::HashMap;
use std::fmt;

use crate::emulator::CpuVariant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    /// (zp,X)
    IndexedIndirect,
    /// (zp),Y
    IndirectIndexed,
    /// (zp), 65C02 only
    ZeroPageIndirect,
    /// (abs,X), 65C02 only
    AbsoluteIndexedIndirect,
    Relative,
}

impl AddressingMode {
    pub fn bytes(&self) -> u8 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 1,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed
            | AddressingMode::ZeroPageIndirect
            | AddressingMode::Relative => 2,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect
            | AddressingMode::AbsoluteIndexedIndirect => 3,
        }
    }
}

#[rustfmt::skip]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mnemonic {
    ADC, AND, ASL, BCC, BCS, BEQ, BIT, BMI, BNE, BPL, BRK, BVC, BVS, CLC,
    CLD, CLI, CLV, CMP, CPX, CPY, DEC, DEX, DEY, EOR, INC, INX, INY, JMP,
    JSR, LDA, LDX, LDY, LSR, NOP, ORA, PHA, PHP, PLA, PLP, ROL, ROR, RTI,
    RTS, SBC, SEC, SED, SEI, STA, STX, STY, TAX, TAY, TSX, TXA, TXS, TYA,
    // 65C02
    BRA, PHX, PHY, PLX, PLY, STZ, TRB, TSB,
}

impl Mnemonic {
    /// Instructions that pay an extra cycle when indexing crosses a page.
    fn reads_operand(&self) -> bool {
        matches!(
            self,
            Mnemonic::ADC
                | Mnemonic::AND
                | Mnemonic::BIT
                | Mnemonic::CMP
                | Mnemonic::EOR
                | Mnemonic::LDA
                | Mnemonic::LDX
                | Mnemonic::LDY
                | Mnemonic::ORA
                | Mnemonic::SBC
        )
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Opcode {
    pub code: u8,
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    pub bytes: u8,
    pub cycles: u8,
    pub page_penalty: bool,
}

impl Opcode {
    pub fn new(code: u8, mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> Self {
        let indexed = matches!(
            mode,
            AddressingMode::AbsoluteX | AddressingMode::AbsoluteY | AddressingMode::IndirectIndexed
        );
        Opcode {
            code,
            mnemonic,
            mode,
            bytes: mode.bytes(),
            cycles,
            page_penalty: indexed && mnemonic.reads_operand(),
        }
    }

    /// Renders the instruction with its operand bytes, e.g. `LDA ($10),Y`.
    pub fn disassemble(&self, lo: u8, hi: u8) -> String {
        let word = u16::from_le_bytes([lo, hi]);
        match self.mode {
            AddressingMode::Implied => format!("{}", self.mnemonic),
            AddressingMode::Accumulator => format!("{} A", self.mnemonic),
            AddressingMode::Immediate => format!("{} #${:02X}", self.mnemonic, lo),
            AddressingMode::ZeroPage => format!("{} ${:02X}", self.mnemonic, lo),
            AddressingMode::ZeroPageX => format!("{} ${:02X},X", self.mnemonic, lo),
            AddressingMode::ZeroPageY => format!("{} ${:02X},Y", self.mnemonic, lo),
            AddressingMode::Absolute => format!("{} ${:04X}", self.mnemonic, word),
            AddressingMode::AbsoluteX => format!("{} ${:04X},X", self.mnemonic, word),
            AddressingMode::AbsoluteY => format!("{} ${:04X},Y", self.mnemonic, word),
            AddressingMode::Indirect => format!("{} (${:04X})", self.mnemonic, word),
            AddressingMode::IndexedIndirect => format!("{} (${:02X},X)", self.mnemonic, lo),
            AddressingMode::IndirectIndexed => format!("{} (${:02X}),Y", self.mnemonic, lo),
            AddressingMode::ZeroPageIndirect => format!("{} (${:02X})", self.mnemonic, lo),
            AddressingMode::AbsoluteIndexedIndirect => {
                format!("{} (${:04X},X)", self.mnemonic, word)
            }
            AddressingMode::Relative => format!("{} {:+}", self.mnemonic, lo as i8),
        }
    }

    #[rustfmt::skip]
    pub fn generate_opcode_map(variant: CpuVariant) -> HashMap<u8, Opcode> {
        use AddressingMode::*;
        use Mnemonic::*;

        let mut opcodes: Vec<Opcode> = vec![
            // Load/store
            Opcode::new(0xa9, LDA, Immediate, 2),
            Opcode::new(0xa5, LDA, ZeroPage, 3),
            Opcode::new(0xb5, LDA, ZeroPageX, 4),
            Opcode::new(0xad, LDA, Absolute, 4),
            Opcode::new(0xbd, LDA, AbsoluteX, 4),
            Opcode::new(0xb9, LDA, AbsoluteY, 4),
            Opcode::new(0xa1, LDA, IndexedIndirect, 6),
            Opcode::new(0xb1, LDA, IndirectIndexed, 5),
            Opcode::new(0xa2, LDX, Immediate, 2),
            Opcode::new(0xa6, LDX, ZeroPage, 3),
            Opcode::new(0xb6, LDX, ZeroPageY, 4),
            Opcode::new(0xae, LDX, Absolute, 4),
            Opcode::new(0xbe, LDX, AbsoluteY, 4),
            Opcode::new(0xa0, LDY, Immediate, 2),
            Opcode::new(0xa4, LDY, ZeroPage, 3),
            Opcode::new(0xb4, LDY, ZeroPageX, 4),
            Opcode::new(0xac, LDY, Absolute, 4),
            Opcode::new(0xbc, LDY, AbsoluteX, 4),
            Opcode::new(0x85, STA, ZeroPage, 3),
            Opcode::new(0x95, STA, ZeroPageX, 4),
            Opcode::new(0x8d, STA, Absolute, 4),
            Opcode::new(0x9d, STA, AbsoluteX, 5),
            Opcode::new(0x99, STA, AbsoluteY, 5),
            Opcode::new(0x81, STA, IndexedIndirect, 6),
            Opcode::new(0x91, STA, IndirectIndexed, 6),
            Opcode::new(0x86, STX, ZeroPage, 3),
            Opcode::new(0x96, STX, ZeroPageY, 4),
            Opcode::new(0x8e, STX, Absolute, 4),
            Opcode::new(0x84, STY, ZeroPage, 3),
            Opcode::new(0x94, STY, ZeroPageX, 4),
            Opcode::new(0x8c, STY, Absolute, 4),
            // Register transfers
            Opcode::new(0xaa, TAX, Implied, 2),
            Opcode::new(0xa8, TAY, Implied, 2),
            Opcode::new(0x8a, TXA, Implied, 2),
            Opcode::new(0x98, TYA, Implied, 2),
            Opcode::new(0xba, TSX, Implied, 2),
            Opcode::new(0x9a, TXS, Implied, 2),
            // Stack
            Opcode::new(0x48, PHA, Implied, 3),
            Opcode::new(0x08, PHP, Implied, 3),
            Opcode::new(0x68, PLA, Implied, 4),
            Opcode::new(0x28, PLP, Implied, 4),
            // Logical
            Opcode::new(0x29, AND, Immediate, 2),
            Opcode::new(0x25, AND, ZeroPage, 3),
            Opcode::new(0x35, AND, ZeroPageX, 4),
            Opcode::new(0x2d, AND, Absolute, 4),
            Opcode::new(0x3d, AND, AbsoluteX, 4),
            Opcode::new(0x39, AND, AbsoluteY, 4),
            Opcode::new(0x21, AND, IndexedIndirect, 6),
            Opcode::new(0x31, AND, IndirectIndexed, 5),
            Opcode::new(0x49, EOR, Immediate, 2),
            Opcode::new(0x45, EOR, ZeroPage, 3),
            Opcode::new(0x55, EOR, ZeroPageX, 4),
            Opcode::new(0x4d, EOR, Absolute, 4),
            Opcode::new(0x5d, EOR, AbsoluteX, 4),
            Opcode::new(0x59, EOR, AbsoluteY, 4),
            Opcode::new(0x41, EOR, IndexedIndirect, 6),
            Opcode::new(0x51, EOR, IndirectIndexed, 5),
            Opcode::new(0x09, ORA, Immediate, 2),
            Opcode::new(0x05, ORA, ZeroPage, 3),
            Opcode::new(0x15, ORA, ZeroPageX, 4),
            Opcode::new(0x0d, ORA, Absolute, 4),
            Opcode::new(0x1d, ORA, AbsoluteX, 4),
            Opcode::new(0x19, ORA, AbsoluteY, 4),
            Opcode::new(0x01, ORA, IndexedIndirect, 6),
            Opcode::new(0x11, ORA, IndirectIndexed, 5),
            Opcode::new(0x24, BIT, ZeroPage, 3),
            Opcode::new(0x2c, BIT, Absolute, 4),
            // Arithmetic
            Opcode::new(0x69, ADC, Immediate, 2),
            Opcode::new(0x65, ADC, ZeroPage, 3),
            Opcode::new(0x75, ADC, ZeroPageX, 4),
            Opcode::new(0x6d, ADC, Absolute, 4),
            Opcode::new(0x7d, ADC, AbsoluteX, 4),
            Opcode::new(0x79, ADC, AbsoluteY, 4),
            Opcode::new(0x61, ADC, IndexedIndirect, 6),
            Opcode::new(0x71, ADC, IndirectIndexed, 5),
            Opcode::new(0xe9, SBC, Immediate, 2),
            Opcode::new(0xe5, SBC, ZeroPage, 3),
            Opcode::new(0xf5, SBC, ZeroPageX, 4),
            Opcode::new(0xed, SBC, Absolute, 4),
            Opcode::new(0xfd, SBC, AbsoluteX, 4),
            Opcode::new(0xf9, SBC, AbsoluteY, 4),
            Opcode::new(0xe1, SBC, IndexedIndirect, 6),
            Opcode::new(0xf1, SBC, IndirectIndexed, 5),
            Opcode::new(0xc9, CMP, Immediate, 2),
            Opcode::new(0xc5, CMP, ZeroPage, 3),
            Opcode::new(0xd5, CMP, ZeroPageX, 4),
            Opcode::new(0xcd, CMP, Absolute, 4),
            Opcode::new(0xdd, CMP, AbsoluteX, 4),
            Opcode::new(0xd9, CMP, AbsoluteY, 4),
            Opcode::new(0xc1, CMP, IndexedIndirect, 6),
            Opcode::new(0xd1, CMP, IndirectIndexed, 5),
            Opcode::new(0xe0, CPX, Immediate, 2),
            Opcode::new(0xe4, CPX, ZeroPage, 3),
            Opcode::new(0xec, CPX, Absolute, 4),
            Opcode::new(0xc0, CPY, Immediate, 2),
            Opcode::new(0xc4, CPY, ZeroPage, 3),
            Opcode::new(0xcc, CPY, Absolute, 4),
            // Increments and decrements
            Opcode::new(0xe6, INC, ZeroPage, 5),
            Opcode::new(0xf6, INC, ZeroPageX, 6),
            Opcode::new(0xee, INC, Absolute, 6),
            Opcode::new(0xfe, INC, AbsoluteX, 7),
            Opcode::new(0xe8, INX, Implied, 2),
            Opcode::new(0xc8, INY, Implied, 2),
            Opcode::new(0xc6, DEC, ZeroPage, 5),
            Opcode::new(0xd6, DEC, ZeroPageX, 6),
            Opcode::new(0xce, DEC, Absolute, 6),
            Opcode::new(0xde, DEC, AbsoluteX, 7),
            Opcode::new(0xca, DEX, Implied, 2),
            Opcode::new(0x88, DEY, Implied, 2),
            // Shifts
            Opcode::new(0x0a, ASL, Accumulator, 2),
            Opcode::new(0x06, ASL, ZeroPage, 5),
            Opcode::new(0x16, ASL, ZeroPageX, 6),
            Opcode::new(0x0e, ASL, Absolute, 6),
            Opcode::new(0x1e, ASL, AbsoluteX, 7),
            Opcode::new(0x4a, LSR, Accumulator, 2),
            Opcode::new(0x46, LSR, ZeroPage, 5),
            Opcode::new(0x56, LSR, ZeroPageX, 6),
            Opcode::new(0x4e, LSR, Absolute, 6),
            Opcode::new(0x5e, LSR, AbsoluteX, 7),
            Opcode::new(0x2a, ROL, Accumulator, 2),
            Opcode::new(0x26, ROL, ZeroPage, 5),
            Opcode::new(0x36, ROL, ZeroPageX, 6),
            Opcode::new(0x2e, ROL, Absolute, 6),
            Opcode::new(0x3e, ROL, AbsoluteX, 7),
            Opcode::new(0x6a, ROR, Accumulator, 2),
            Opcode::new(0x66, ROR, ZeroPage, 5),
            Opcode::new(0x76, ROR, ZeroPageX, 6),
            Opcode::new(0x6e, ROR, Absolute, 6),
            Opcode::new(0x7e, ROR, AbsoluteX, 7),
            // Jumps and calls
            Opcode::new(0x4c, JMP, Absolute, 3),
            Opcode::new(0x6c, JMP, Indirect, 5),
            Opcode::new(0x20, JSR, Absolute, 6),
            Opcode::new(0x60, RTS, Implied, 6),
            // Branches, +1 if taken and +1 more if the target is on another page
            Opcode::new(0x90, BCC, Relative, 2),
            Opcode::new(0xb0, BCS, Relative, 2),
            Opcode::new(0xf0, BEQ, Relative, 2),
            Opcode::new(0x30, BMI, Relative, 2),
            Opcode::new(0xd0, BNE, Relative, 2),
            Opcode::new(0x10, BPL, Relative, 2),
            Opcode::new(0x50, BVC, Relative, 2),
            Opcode::new(0x70, BVS, Relative, 2),
            // Status flags
            Opcode::new(0x18, CLC, Implied, 2),
            Opcode::new(0xd8, CLD, Implied, 2),
            Opcode::new(0x58, CLI, Implied, 2),
            Opcode::new(0xb8, CLV, Implied, 2),
            Opcode::new(0x38, SEC, Implied, 2),
            Opcode::new(0xf8, SED, Implied, 2),
            Opcode::new(0x78, SEI, Implied, 2),
            // System
            Opcode::new(0x00, BRK, Implied, 7),
            Opcode::new(0xea, NOP, Implied, 2),
            Opcode::new(0x40, RTI, Implied, 6),
        ];

        if variant == CpuVariant::Cmos65C02 {
            opcodes.extend([
                Opcode::new(0x12, ORA, ZeroPageIndirect, 5),
                Opcode::new(0x32, AND, ZeroPageIndirect, 5),
                Opcode::new(0x52, EOR, ZeroPageIndirect, 5),
                Opcode::new(0x72, ADC, ZeroPageIndirect, 5),
                Opcode::new(0x92, STA, ZeroPageIndirect, 5),
                Opcode::new(0xb2, LDA, ZeroPageIndirect, 5),
                Opcode::new(0xd2, CMP, ZeroPageIndirect, 5),
                Opcode::new(0xf2, SBC, ZeroPageIndirect, 5),
                Opcode::new(0x89, BIT, Immediate, 2),
                Opcode::new(0x34, BIT, ZeroPageX, 4),
                Opcode::new(0x3c, BIT, AbsoluteX, 4),
                Opcode::new(0x80, BRA, Relative, 2),
                Opcode::new(0x1a, INC, Accumulator, 2),
                Opcode::new(0x3a, DEC, Accumulator, 2),
                Opcode::new(0x6c, JMP, Indirect, 6),
                Opcode::new(0x7c, JMP, AbsoluteIndexedIndirect, 6),
                Opcode::new(0xda, PHX, Implied, 3),
                Opcode::new(0x5a, PHY, Implied, 3),
                Opcode::new(0xfa, PLX, Implied, 4),
                Opcode::new(0x7a, PLY, Implied, 4),
                Opcode::new(0x64, STZ, ZeroPage, 3),
                Opcode::new(0x74, STZ, ZeroPageX, 4),
                Opcode::new(0x9c, STZ, Absolute, 4),
                Opcode::new(0x9e, STZ, AbsoluteX, 5),
                Opcode::new(0x14, TRB, ZeroPage, 5),
                Opcode::new(0x1c, TRB, Absolute, 6),
                Opcode::new(0x04, TSB, ZeroPage, 5),
                Opcode::new(0x0c, TSB, Absolute, 6),
            ]);
        }

        // Later entries replace earlier ones, so 65C02 timings win.
        opcodes.into_iter().map(|op| (op.code, op)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nmos_table_has_every_documented_opcode() {
        let map = Opcode::generate_opcode_map(CpuVariant::Nmos6502);
        assert_eq!(map.len(), 151);
        assert!(map.values().all(|op| op.bytes == op.mode.bytes()));
        assert!(!map.contains_key(&0x80));
    }

    #[test]
    fn cmos_table_adds_extensions() {
        let map = Opcode::generate_opcode_map(CpuVariant::Cmos65C02);
        assert_eq!(map.len(), 151 + 27);
        assert_eq!(map[&0x80].mnemonic, Mnemonic::BRA);
        assert_eq!(map[&0x6c].cycles, 6);
    }

    #[test]
    fn page_penalty_applies_to_indexed_reads_only() {
        let map = Opcode::generate_opcode_map(CpuVariant::Nmos6502);
        assert!(map[&0xbd].page_penalty);
        assert!(map[&0xb1].page_penalty);
        assert!(!map[&0x9d].page_penalty);
        assert!(!map[&0xfe].page_penalty);
    }

    #[test]
    fn disassembles_operands() {
        let map = Opcode::generate_opcode_map(CpuVariant::Nmos6502);
        assert_eq!(map[&0xa9].disassemble(0x05, 0x00), "LDA #$05");
        assert_eq!(map[&0x91].disassemble(0x10, 0x00), "STA ($10),Y");
        assert_eq!(map[&0x8d].disassemble(0x00, 0x02), "STA $0200");
        assert_eq!(map[&0xd0].disassemble(0xfe, 0x00), "BNE -2");
    }
}
