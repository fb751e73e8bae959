use bitflags::bitflags;
use parse_display::Display;

use super::exception::Exception;
use crate::constants as C;

bitflags! {
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Flags: C::Word {
        /// Op-kind marker: set by every subtraction-like operation,
        /// cleared by everything else. Not a sign bit.
        const NEGATIVE = 0b0001;
        const CARRY    = 0b0010;
        const ZERO     = 0b0100;
        /// Only ever changed by restoring a snapshot
        const SIGNED   = 0b1000;
    }
}

impl std::fmt::Debug for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06b}", self.bits())
    }
}

/// One of the four flag bits, as named by flag-testing jumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FlagBit {
    #[display("n")]
    Negative,

    #[display("c")]
    Carry,

    #[display("z")]
    Zero,

    #[display("s")]
    Signed,
}

impl FlagBit {
    pub(crate) fn from_index(index: u8) -> Result<Self, Exception> {
        match index {
            0 => Ok(Self::Negative),
            1 => Ok(Self::Carry),
            2 => Ok(Self::Zero),
            3 => Ok(Self::Signed),
            _ => Err(Exception::InvalidFlag(index)),
        }
    }

    pub(crate) const fn mask(self) -> Flags {
        match self {
            Self::Negative => Flags::NEGATIVE,
            Self::Carry => Flags::CARRY,
            Self::Zero => Flags::ZERO,
            Self::Signed => Flags::SIGNED,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registers {
    /// General purpose, `%r0` through `%r7`
    pub general: [C::Word; C::GENERAL_COUNT],

    /// Accumulator, fixed destination of every binary ALU result
    pub acc: C::Word,

    /// Program counter
    pub pc: C::Address,

    /// Stack pointer
    pub sp: C::Address,

    /// Frame pointer, base of the active call frame
    pub fp: C::Address,

    /// Condition flags
    pub flags: Flags,

    /// Words the current frame has pushed beyond its snapshot
    pub frame_pushes: C::Word,
}

impl Registers {
    #[must_use]
    pub fn get(&self, reg: Reg) -> C::Word {
        match reg {
            Reg::R0 => self.general[0],
            Reg::R1 => self.general[1],
            Reg::R2 => self.general[2],
            Reg::R3 => self.general[3],
            Reg::R4 => self.general[4],
            Reg::R5 => self.general[5],
            Reg::R6 => self.general[6],
            Reg::R7 => self.general[7],
            Reg::Acc => self.acc,
            Reg::Pc => self.pc,
        }
    }

    pub fn set(&mut self, reg: Reg, value: C::Word) {
        match reg {
            Reg::R0 => self.general[0] = value,
            Reg::R1 => self.general[1] = value,
            Reg::R2 => self.general[2] = value,
            Reg::R3 => self.general[3] = value,
            Reg::R4 => self.general[4] = value,
            Reg::R5 => self.general[5] = value,
            Reg::R6 => self.general[6] = value,
            Reg::R7 => self.general[7] = value,
            Reg::Acc => self.acc = value,
            Reg::Pc => self.pc = value,
        }
    }

    /// Zero every register, the flags and the push counter
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Display for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, value) in self.general.iter().enumerate() {
            write!(f, "%r{i} = {value} | ")?;
        }
        write!(
            f,
            "%acc = {} | %pc = {} | %sp = {} | %fp = {} | flags = {:?}",
            self.acc, self.pc, self.sp, self.fp, self.flags
        )
    }
}

/// A register reachable through a 4-bit operand selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("%{}", style = "lowercase")]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,

    /// Accumulator
    Acc,

    /// Program counter
    Pc,
}

impl Reg {
    /// The general register file, in snapshot order
    pub const GENERAL: [Self; C::GENERAL_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
    ];

    /// Decode a 4-bit operand selector.
    ///
    /// # Errors
    ///
    /// Selectors outside the register file are a fatal fault, never clamped.
    pub fn from_index(index: u8) -> Result<Self, Exception> {
        match index {
            0 => Ok(Self::R0),
            1 => Ok(Self::R1),
            2 => Ok(Self::R2),
            3 => Ok(Self::R3),
            4 => Ok(Self::R4),
            5 => Ok(Self::R5),
            6 => Ok(Self::R6),
            7 => Ok(Self::R7),
            8 => Ok(Self::Acc),
            9 => Ok(Self::Pc),
            _ => Err(Exception::InvalidRegister(index)),
        }
    }
}

/// Registers reachable only through the move-to/from-special forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("%{}", style = "lowercase")]
pub enum Special {
    /// Stack pointer
    Sp,

    /// Frame pointer
    Fp,

    /// Bank-control word
    Bank,
}

impl Special {
    /// Decode a 4-bit special-register selector.
    ///
    /// # Errors
    ///
    /// Selectors outside the special file are a fatal fault.
    pub fn from_index(index: u8) -> Result<Self, Exception> {
        match index {
            0 => Ok(Self::Sp),
            1 => Ok(Self::Fp),
            2 => Ok(Self::Bank),
            _ => Err(Exception::InvalidSpecial(index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn register_index_mapping() {
        for (index, reg) in Reg::GENERAL.iter().enumerate() {
            assert_eq!(Reg::from_index(index as u8).unwrap(), *reg);
        }
        assert_eq!(Reg::from_index(8).unwrap(), Reg::Acc);
        assert_eq!(Reg::from_index(9).unwrap(), Reg::Pc);

        for index in 10..=15 {
            assert_eq!(
                Reg::from_index(index),
                Err(Exception::InvalidRegister(index))
            );
        }
    }

    #[test]
    fn special_index_mapping() {
        assert_eq!(Special::from_index(0).unwrap(), Special::Sp);
        assert_eq!(Special::from_index(1).unwrap(), Special::Fp);
        assert_eq!(Special::from_index(2).unwrap(), Special::Bank);
        assert_eq!(Special::from_index(3), Err(Exception::InvalidSpecial(3)));
    }

    #[test]
    fn get_set_roundtrip() {
        let mut registers = Registers::default();
        registers.set(Reg::R3, 0x1234);
        registers.set(Reg::Acc, 0x4242);
        registers.set(Reg::Pc, 0x0100);

        assert_eq!(registers.get(Reg::R3), 0x1234);
        assert_eq!(registers.get(Reg::Acc), 0x4242);
        assert_eq!(registers.get(Reg::Pc), 0x0100);
        assert_eq!(registers.get(Reg::R0), 0);
    }

    #[test]
    fn flags_mask_to_four_bits() {
        let flags = Flags::from_bits_truncate(0xFFFF);
        assert_eq!(flags.bits(), 0b1111);

        let flags = Flags::from_bits_truncate(0b1_0110);
        assert_eq!(flags, Flags::CARRY | Flags::ZERO);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut registers = Registers {
            acc: 1,
            pc: 2,
            sp: 3,
            fp: 4,
            flags: Flags::ZERO | Flags::SIGNED,
            frame_pushes: 5,
            ..Registers::default()
        };
        registers.general = [9; C::GENERAL_COUNT];

        registers.reset();
        assert_eq!(registers, Registers::default());
    }

    #[test]
    fn display_names() {
        assert_eq!(Reg::R5.to_string(), "%r5");
        assert_eq!(Reg::Acc.to_string(), "%acc");
        assert_eq!(Special::Bank.to_string(), "%bank");
        assert_eq!(FlagBit::Carry.to_string(), "c");
    }
}
