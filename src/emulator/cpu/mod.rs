pub mod opcodes;
pub mod registers;

use std::collections::{HashMap, VecDeque};

use opcodes::{AddressingMode, Mnemonic, Opcode};
use registers::{Registers, StatusFlag, STATUS_ALWAYS_SET};

use super::{errors::CpuError, memory::MemoryBus, CpuVariant};

const CALL_LOG_HISTORY_LENGTH: usize = 32;
const STACK_PAGE: u16 = 0x0100;
const IRQ_VECTOR: u16 = 0xFFFE;

enum DataType {
    Address(u16),
    ValueU8(u8),
    Accumulator,
    None,
}

pub struct Cpu {
    pub(crate) reg: Registers,
    pub(crate) pc: u16,
    variant: CpuVariant,
    opcodes: HashMap<u8, Opcode>,
    call_log: Option<VecDeque<String>>,
}

impl Cpu {
    pub fn new(variant: CpuVariant, trace: bool) -> Cpu {
        Cpu {
            reg: Registers::new(),
            pc: 0,
            variant,
            opcodes: Opcode::generate_opcode_map(variant),
            call_log: trace.then(VecDeque::new),
        }
    }

    // Debugging methods

    fn push_call_log(&mut self, memory: &MemoryBus, opcode: &Opcode) {
        let Some(log) = self.call_log.as_mut() else {
            return;
        };
        let lo = memory.read_u8(self.pc.wrapping_add(1));
        let hi = memory.read_u8(self.pc.wrapping_add(2));
        let msg = format!(
            "pc:{:#06x} -> '{}' ({:#04x})  A:{:02X} X:{:02X} Y:{:02X} P:{:08b} SP:{:02X}",
            self.pc,
            opcode.disassemble(lo, hi),
            opcode.code,
            self.reg.a,
            self.reg.x,
            self.reg.y,
            self.reg.p,
            self.reg.sp
        );
        log.push_back(msg);
        if log.len() > CALL_LOG_HISTORY_LENGTH {
            log.pop_front();
        }
    }

    /// The most recent instructions, oldest first. Empty unless tracing.
    pub fn call_log(&self) -> Vec<String> {
        self.call_log
            .as_ref()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    // Utility methods

    /// Resolves the operand of the instruction at `pc`. The flag reports an
    /// indexed access that crossed a page boundary.
    fn get_data(&self, memory: &MemoryBus, addressing_mode: AddressingMode) -> (DataType, bool) {
        let operand = self.pc.wrapping_add(1);
        match addressing_mode {
            AddressingMode::Implied => (DataType::None, false),
            AddressingMode::Accumulator => (DataType::Accumulator, false),
            AddressingMode::Immediate => (DataType::ValueU8(memory.read_u8(operand)), false),
            AddressingMode::ZeroPage => (DataType::Address(memory.read_u8(operand) as u16), false),
            AddressingMode::ZeroPageX => {
                let addr = memory.read_u8(operand).wrapping_add(self.reg.x);
                (DataType::Address(addr as u16), false)
            }
            AddressingMode::ZeroPageY => {
                let addr = memory.read_u8(operand).wrapping_add(self.reg.y);
                (DataType::Address(addr as u16), false)
            }
            AddressingMode::Absolute => (DataType::Address(memory.read_u16(operand)), false),
            AddressingMode::AbsoluteX => indexed(memory.read_u16(operand), self.reg.x),
            AddressingMode::AbsoluteY => indexed(memory.read_u16(operand), self.reg.y),
            AddressingMode::Indirect => {
                let ptr = memory.read_u16(operand);
                let addr = if self.variant == CpuVariant::Nmos6502 && ptr & 0xFF == 0xFF {
                    // NMOS fetches the high byte without carrying into the page
                    let lo = memory.read_u8(ptr) as u16;
                    let hi = memory.read_u8(ptr & 0xFF00) as u16;
                    (hi << 8) | lo
                } else {
                    memory.read_u16(ptr)
                };
                (DataType::Address(addr), false)
            }
            AddressingMode::IndexedIndirect => {
                let zp = memory.read_u8(operand).wrapping_add(self.reg.x);
                (DataType::Address(memory.read_u16_zero_page(zp)), false)
            }
            AddressingMode::IndirectIndexed => {
                let base = memory.read_u16_zero_page(memory.read_u8(operand));
                indexed(base, self.reg.y)
            }
            AddressingMode::ZeroPageIndirect => {
                let zp = memory.read_u8(operand);
                (DataType::Address(memory.read_u16_zero_page(zp)), false)
            }
            AddressingMode::AbsoluteIndexedIndirect => {
                let ptr = memory.read_u16(operand).wrapping_add(self.reg.x as u16);
                (DataType::Address(memory.read_u16(ptr)), false)
            }
            AddressingMode::Relative => {
                let offset = memory.read_u8(operand) as i8;
                let next = self.pc.wrapping_add(2);
                (DataType::Address(next.wrapping_add(offset as u16)), false)
            }
        }
    }

    fn read_operand(&self, memory: &MemoryBus, data: &DataType) -> u8 {
        match data {
            DataType::Address(addr) => memory.read_u8(*addr),
            DataType::ValueU8(value) => *value,
            DataType::Accumulator => self.reg.a,
            DataType::None => 0,
        }
    }

    fn write_operand(&mut self, memory: &mut MemoryBus, data: &DataType, value: u8) {
        match data {
            DataType::Address(addr) => memory.write_u8(*addr, value),
            DataType::Accumulator => self.reg.a = value,
            DataType::ValueU8(_) | DataType::None => (),
        }
    }

    fn address(data: &DataType) -> u16 {
        match data {
            DataType::Address(addr) => *addr,
            _ => 0,
        }
    }

    pub fn push_stack(&mut self, memory: &mut MemoryBus, value: u8) {
        memory.write_u8(STACK_PAGE | self.reg.sp as u16, value);
        self.reg.sp = self.reg.sp.wrapping_sub(1);
    }

    pub fn pop_stack(&mut self, memory: &mut MemoryBus) -> u8 {
        self.reg.sp = self.reg.sp.wrapping_add(1);
        memory.read_u8(STACK_PAGE | self.reg.sp as u16)
    }

    fn push_stack_u16(&mut self, memory: &mut MemoryBus, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push_stack(memory, hi);
        self.push_stack(memory, lo);
    }

    fn pop_stack_u16(&mut self, memory: &mut MemoryBus) -> u16 {
        let lo = self.pop_stack(memory);
        let hi = self.pop_stack(memory);
        u16::from_le_bytes([lo, hi])
    }

    // Opcode methods

    fn add_with_carry(&mut self, value: u8) -> u32 {
        let a = self.reg.a;
        let carry = self.reg.carry();

        if !self.reg.flag(StatusFlag::Decimal) {
            let sum = a as u16 + value as u16 + carry as u16;
            let result = sum as u8;
            self.reg.set_flag(StatusFlag::Carry, sum > 0xFF);
            self.reg
                .set_flag(StatusFlag::Overflow, (!(a ^ value) & (a ^ result)) & 0x80 != 0);
            self.reg.set_zn_flags(result);
            self.reg.a = result;
            return 0;
        }

        let mut half_carry = 0;
        let mut adjust_lo = 0;
        let mut adjust_hi = 0;
        let mut nibble_lo = (a & 0x0F) + (value & 0x0F) + carry;
        if nibble_lo > 9 {
            adjust_lo = 6;
            half_carry = 1;
        }
        let mut nibble_hi = (a >> 4) + (value >> 4) + half_carry;
        let decimal_carry = nibble_hi > 9;
        if decimal_carry {
            adjust_hi = 6;
        }
        nibble_lo &= 0x0F;
        nibble_hi &= 0x0F;
        // Flags come from the unadjusted binary result.
        let alu = (nibble_hi << 4) | nibble_lo;
        let result = (((nibble_hi + adjust_hi) & 0x0F) << 4) | ((nibble_lo + adjust_lo) & 0x0F);

        self.reg.set_flag(StatusFlag::Carry, decimal_carry);
        self.reg
            .set_flag(StatusFlag::Overflow, (!(a ^ value) & (a ^ alu)) & 0x80 != 0);
        self.reg.a = result;
        self.decimal_flags(alu, result)
    }

    fn subtract_with_carry(&mut self, value: u8) -> u32 {
        if !self.reg.flag(StatusFlag::Decimal) {
            return self.add_with_carry(!value);
        }

        let a = self.reg.a;
        let carry = self.reg.carry();
        let inverted = !value;

        let mut half_carry = 1;
        let mut adjust_lo: u16 = 0;
        let mut adjust_hi: u16 = 0;
        let nibble_lo = (a & 0x0F) + (inverted & 0x0F) + carry;
        if nibble_lo <= 0x0F {
            half_carry = 0;
            adjust_lo = 10;
        }
        let nibble_hi = (a >> 4) + (inverted >> 4) + half_carry;
        if nibble_hi <= 0x0F {
            adjust_hi = 10 << 4;
        }
        let sum = a as u16 + inverted as u16 + carry as u16;
        let alu = sum as u8;
        let result_lo = (alu as u16 + adjust_lo) & 0x0F;
        let result_hi = ((alu as u16 + adjust_hi) >> 4) & 0x0F;
        let result = ((result_hi << 4) | result_lo) as u8;

        self.reg.set_flag(StatusFlag::Carry, sum > 0xFF);
        self.reg
            .set_flag(StatusFlag::Overflow, ((a ^ value) & (a ^ alu)) & 0x80 != 0);
        self.reg.a = result;
        self.decimal_flags(alu, result)
    }

    /// NMOS sets N and Z from the binary intermediate; the 65C02 spends a
    /// cycle to set them from the adjusted result.
    fn decimal_flags(&mut self, alu: u8, result: u8) -> u32 {
        match self.variant {
            CpuVariant::Nmos6502 => {
                self.reg.set_zn_flags(alu);
                0
            }
            CpuVariant::Cmos65C02 => {
                self.reg.set_zn_flags(result);
                1
            }
        }
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.reg.set_flag(StatusFlag::Carry, register >= value);
        self.reg.set_zn_flags(register.wrapping_sub(value));
    }

    fn bit_test(&mut self, value: u8, immediate: bool) {
        self.reg.set_flag(StatusFlag::Zero, self.reg.a & value == 0);
        if !immediate {
            self.reg.set_flag(StatusFlag::Negative, value & 0x80 != 0);
            self.reg.set_flag(StatusFlag::Overflow, value & 0x40 != 0);
        }
    }

    fn shift(&mut self, memory: &mut MemoryBus, data: &DataType, mnemonic: Mnemonic) {
        let value = self.read_operand(memory, data);
        let carry_in = self.reg.carry();
        let (result, carry_out) = match mnemonic {
            Mnemonic::ASL => (value << 1, value & 0x80 != 0),
            Mnemonic::LSR => (value >> 1, value & 0x01 != 0),
            Mnemonic::ROL => ((value << 1) | carry_in, value & 0x80 != 0),
            _ => ((value >> 1) | (carry_in << 7), value & 0x01 != 0),
        };
        self.reg.set_flag(StatusFlag::Carry, carry_out);
        self.reg.set_zn_flags(result);
        self.write_operand(memory, data, result);
    }

    /// Returns the extra cycles a taken branch costs.
    fn branch(&mut self, target: u16, condition: bool) -> u32 {
        if !condition {
            return 0;
        }
        let crossed = (self.pc & 0xFF00) != (target & 0xFF00);
        self.pc = target;
        if crossed {
            2
        } else {
            1
        }
    }

    fn interrupt(&mut self, memory: &mut MemoryBus, return_addr: u16) {
        self.push_stack_u16(memory, return_addr);
        let status = self.reg.p | STATUS_ALWAYS_SET;
        self.push_stack(memory, status);
        self.reg.set_flag(StatusFlag::InterruptDisable, true);
        if self.variant == CpuVariant::Cmos65C02 {
            self.reg.set_flag(StatusFlag::Decimal, false);
        }
        self.pc = memory.read_u16(IRQ_VECTOR);
    }

    // Execution methods

    /// Executes one instruction and returns the cycles it took.
    pub fn execute_next_opcode(&mut self, memory: &mut MemoryBus) -> Result<u32, CpuError> {
        let code = memory.read_u8(self.pc);
        let opcode = match self.opcodes.get(&code) {
            Some(op) => *op,
            None => {
                return Err(CpuError::UnrecognizedOpcode {
                    code,
                    pc: self.pc,
                    variant: self.variant,
                })
            }
        };

        self.push_call_log(memory, &opcode);

        let (data, page_crossed) = self.get_data(memory, opcode.mode);
        let start = self.pc;
        self.pc = self.pc.wrapping_add(opcode.bytes as u16);

        let mut extra_cycles: u32 = if page_crossed && opcode.page_penalty { 1 } else { 0 };

        match opcode.mnemonic {
            Mnemonic::LDA => {
                self.reg.a = self.read_operand(memory, &data);
                self.reg.set_zn_flags(self.reg.a);
            }
            Mnemonic::LDX => {
                self.reg.x = self.read_operand(memory, &data);
                self.reg.set_zn_flags(self.reg.x);
            }
            Mnemonic::LDY => {
                self.reg.y = self.read_operand(memory, &data);
                self.reg.set_zn_flags(self.reg.y);
            }
            Mnemonic::STA => self.write_operand(memory, &data, self.reg.a),
            Mnemonic::STX => self.write_operand(memory, &data, self.reg.x),
            Mnemonic::STY => self.write_operand(memory, &data, self.reg.y),
            Mnemonic::STZ => self.write_operand(memory, &data, 0),
            Mnemonic::TAX => {
                self.reg.x = self.reg.a;
                self.reg.set_zn_flags(self.reg.x);
            }
            Mnemonic::TAY => {
                self.reg.y = self.reg.a;
                self.reg.set_zn_flags(self.reg.y);
            }
            Mnemonic::TXA => {
                self.reg.a = self.reg.x;
                self.reg.set_zn_flags(self.reg.a);
            }
            Mnemonic::TYA => {
                self.reg.a = self.reg.y;
                self.reg.set_zn_flags(self.reg.a);
            }
            Mnemonic::TSX => {
                self.reg.x = self.reg.sp;
                self.reg.set_zn_flags(self.reg.x);
            }
            Mnemonic::TXS => self.reg.sp = self.reg.x,
            Mnemonic::PHA => self.push_stack(memory, self.reg.a),
            Mnemonic::PHX => self.push_stack(memory, self.reg.x),
            Mnemonic::PHY => self.push_stack(memory, self.reg.y),
            Mnemonic::PHP => self.push_stack(memory, self.reg.p | STATUS_ALWAYS_SET),
            Mnemonic::PLA => {
                self.reg.a = self.pop_stack(memory);
                self.reg.set_zn_flags(self.reg.a);
            }
            Mnemonic::PLX => {
                self.reg.x = self.pop_stack(memory);
                self.reg.set_zn_flags(self.reg.x);
            }
            Mnemonic::PLY => {
                self.reg.y = self.pop_stack(memory);
                self.reg.set_zn_flags(self.reg.y);
            }
            Mnemonic::PLP => self.reg.p = self.pop_stack(memory) | STATUS_ALWAYS_SET,
            Mnemonic::AND => {
                self.reg.a &= self.read_operand(memory, &data);
                self.reg.set_zn_flags(self.reg.a);
            }
            Mnemonic::EOR => {
                self.reg.a ^= self.read_operand(memory, &data);
                self.reg.set_zn_flags(self.reg.a);
            }
            Mnemonic::ORA => {
                self.reg.a |= self.read_operand(memory, &data);
                self.reg.set_zn_flags(self.reg.a);
            }
            Mnemonic::BIT => {
                let value = self.read_operand(memory, &data);
                self.bit_test(value, opcode.mode == AddressingMode::Immediate);
            }
            Mnemonic::TSB | Mnemonic::TRB => {
                let value = self.read_operand(memory, &data);
                self.reg.set_flag(StatusFlag::Zero, self.reg.a & value == 0);
                let result = if opcode.mnemonic == Mnemonic::TSB {
                    value | self.reg.a
                } else {
                    value & !self.reg.a
                };
                self.write_operand(memory, &data, result);
            }
            Mnemonic::ADC => {
                let value = self.read_operand(memory, &data);
                extra_cycles += self.add_with_carry(value);
            }
            Mnemonic::SBC => {
                let value = self.read_operand(memory, &data);
                extra_cycles += self.subtract_with_carry(value);
            }
            Mnemonic::CMP => {
                let value = self.read_operand(memory, &data);
                self.compare(self.reg.a, value);
            }
            Mnemonic::CPX => {
                let value = self.read_operand(memory, &data);
                self.compare(self.reg.x, value);
            }
            Mnemonic::CPY => {
                let value = self.read_operand(memory, &data);
                self.compare(self.reg.y, value);
            }
            Mnemonic::INC => {
                let value = self.read_operand(memory, &data).wrapping_add(1);
                self.reg.set_zn_flags(value);
                self.write_operand(memory, &data, value);
            }
            Mnemonic::DEC => {
                let value = self.read_operand(memory, &data).wrapping_sub(1);
                self.reg.set_zn_flags(value);
                self.write_operand(memory, &data, value);
            }
            Mnemonic::INX => {
                self.reg.x = self.reg.x.wrapping_add(1);
                self.reg.set_zn_flags(self.reg.x);
            }
            Mnemonic::INY => {
                self.reg.y = self.reg.y.wrapping_add(1);
                self.reg.set_zn_flags(self.reg.y);
            }
            Mnemonic::DEX => {
                self.reg.x = self.reg.x.wrapping_sub(1);
                self.reg.set_zn_flags(self.reg.x);
            }
            Mnemonic::DEY => {
                self.reg.y = self.reg.y.wrapping_sub(1);
                self.reg.set_zn_flags(self.reg.y);
            }
            Mnemonic::ASL | Mnemonic::LSR | Mnemonic::ROL | Mnemonic::ROR => {
                self.shift(memory, &data, opcode.mnemonic)
            }
            Mnemonic::JMP => self.pc = Self::address(&data),
            Mnemonic::JSR => {
                let return_addr = start.wrapping_add(2);
                self.push_stack_u16(memory, return_addr);
                self.pc = Self::address(&data);
            }
            Mnemonic::RTS => self.pc = self.pop_stack_u16(memory).wrapping_add(1),
            Mnemonic::RTI => {
                self.reg.p = self.pop_stack(memory) | STATUS_ALWAYS_SET;
                self.pc = self.pop_stack_u16(memory);
            }
            Mnemonic::BRK => self.interrupt(memory, start.wrapping_add(2)),
            Mnemonic::BCC => {
                extra_cycles += self.branch(Self::address(&data), !self.reg.flag(StatusFlag::Carry))
            }
            Mnemonic::BCS => {
                extra_cycles += self.branch(Self::address(&data), self.reg.flag(StatusFlag::Carry))
            }
            Mnemonic::BEQ => {
                extra_cycles += self.branch(Self::address(&data), self.reg.flag(StatusFlag::Zero))
            }
            Mnemonic::BNE => {
                extra_cycles += self.branch(Self::address(&data), !self.reg.flag(StatusFlag::Zero))
            }
            Mnemonic::BMI => {
                extra_cycles +=
                    self.branch(Self::address(&data), self.reg.flag(StatusFlag::Negative))
            }
            Mnemonic::BPL => {
                extra_cycles +=
                    self.branch(Self::address(&data), !self.reg.flag(StatusFlag::Negative))
            }
            Mnemonic::BVC => {
                extra_cycles +=
                    self.branch(Self::address(&data), !self.reg.flag(StatusFlag::Overflow))
            }
            Mnemonic::BVS => {
                extra_cycles +=
                    self.branch(Self::address(&data), self.reg.flag(StatusFlag::Overflow))
            }
            Mnemonic::BRA => extra_cycles += self.branch(Self::address(&data), true),
            Mnemonic::CLC => self.reg.set_flag(StatusFlag::Carry, false),
            Mnemonic::CLD => self.reg.set_flag(StatusFlag::Decimal, false),
            Mnemonic::CLI => self.reg.set_flag(StatusFlag::InterruptDisable, false),
            Mnemonic::CLV => self.reg.set_flag(StatusFlag::Overflow, false),
            Mnemonic::SEC => self.reg.set_flag(StatusFlag::Carry, true),
            Mnemonic::SED => self.reg.set_flag(StatusFlag::Decimal, true),
            Mnemonic::SEI => self.reg.set_flag(StatusFlag::InterruptDisable, true),
            Mnemonic::NOP => (),
        }

        Ok(opcode.cycles as u32 + extra_cycles)
    }
}

fn indexed(base: u16, index: u8) -> (DataType, bool) {
    let addr = base.wrapping_add(index as u16);
    (DataType::Address(addr), (base & 0xFF00) != (addr & 0xFF00))
}
