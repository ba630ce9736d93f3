use crate::utils::bit_ops::BitOps;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFlag {
    Carry,
    Zero,
    InterruptDisable,
    Decimal,
    Break,
    Unused,
    Overflow,
    Negative,
}

impl StatusFlag {
    pub fn bit(&self) -> u8 {
        match self {
            StatusFlag::Carry => 0,
            StatusFlag::Zero => 1,
            StatusFlag::InterruptDisable => 2,
            StatusFlag::Decimal => 3,
            StatusFlag::Break => 4,
            StatusFlag::Unused => 5,
            StatusFlag::Overflow => 6,
            StatusFlag::Negative => 7,
        }
    }
}

/// Break and unused bits, which always read back as set.
pub const STATUS_ALWAYS_SET: u8 = 0x30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub p: u8,
}

impl Registers {
    pub fn new() -> Self {
        Registers {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            p: STATUS_ALWAYS_SET,
        }
    }

    pub fn flag(&self, flag: StatusFlag) -> bool {
        self.p.get_bit(flag.bit())
    }

    pub fn set_flag(&mut self, flag: StatusFlag, value: bool) {
        self.p.assign_bit(flag.bit(), value)
    }

    pub fn carry(&self) -> u8 {
        u8::from(self.flag(StatusFlag::Carry))
    }

    /// Updates Z and N from a result byte.
    pub fn set_zn_flags(&mut self, value: u8) {
        self.set_flag(StatusFlag::Zero, value == 0);
        self.set_flag(StatusFlag::Negative, value.get_bit(7));
    }
}

impl Default for Registers {
    fn default() -> Self {
        Registers::new()
    }
}
