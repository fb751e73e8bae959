//! Instruction decode and execution.
//!
//! An instruction word carries the opcode in its high byte and up to two
//! 4-bit operand selectors in its low byte (high nibble first). Forms that
//! need a 16-bit literal consume one trailing word from the stream; the
//! literal-to-literal-address store consumes two (value, then address).
//!
//! Opcode families, by high byte:
//!
//! | range       | family |
//! |-------------|--------|
//! | `0x00-0x07` | control: nop, halt, push, pop, call, ret |
//! | `0x10-0x17` | moves, including pointer and special forms |
//! | `0x20-0x2A` | add, sub, inc, dec, mul |
//! | `0x30-0x3B` | div, mod and their signed variants |
//! | `0x40-0x4A` | and, or, xor, not |
//! | `0x50-0x5B` | shifts and rotates |
//! | `0x60-0x64` | unconditional jumps |
//! | `0x70-0x7F` | jumps on register equality and register-vs-zero |
//! | `0x80-0x87` | jumps on a named flag bit |
//! | `0x90-0xCF` | compare-and-branch, unsigned/signed, vs register/zero |
//!
//! In the conditional families the two low opcode bits select the target
//! mode: 0 = literal address, 1 = register, 2 = literal pointer,
//! 3 = register pointer. Two-register conditions keep both low-byte
//! nibbles for the test and name a register target in the low nibble of
//! their trailing word instead.

use parse_display::Display;
use tracing::debug;

use super::{
    exception::Exception,
    registers::{FlagBit, Flags, Reg, Registers, Special},
    Machine, ProcessorError, Target, Value,
};
use crate::constants as C;

/// Relation tested by the compare-and-branch families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum Rel {
    Gt,
    Lt,
    Ge,
    Le,
}

impl Rel {
    fn holds<T: Ord>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

/// Whether a comparison reinterprets its words as two's-complement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Sign {
    #[display("")]
    Unsigned,

    #[display("s")]
    Signed,
}

fn compare(sign: Sign, rel: Rel, lhs: C::Word, rhs: C::Word) -> bool {
    match sign {
        Sign::Unsigned => rel.holds(lhs, rhs),
        Sign::Signed => rel.holds(lhs as i16, rhs as i16),
    }
}

/// Branch condition, one opcode per form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Condition {
    #[display("eq {0}, {1}")]
    Eq(Reg, Reg),

    #[display("ne {0}, {1}")]
    Ne(Reg, Reg),

    #[display("z {0}")]
    Zero(Reg),

    #[display("nz {0}")]
    NotZero(Reg),

    /// The named flag bit is set
    #[display("{0}s")]
    FlagSet(FlagBit),

    /// The named flag bit is clear
    #[display("{0}c")]
    FlagClear(FlagBit),

    #[display("{0}{1} {2}, {3}")]
    Cmp(Sign, Rel, Reg, Reg),

    #[display("{0}{1}z {2}")]
    CmpZero(Sign, Rel, Reg),
}

impl Condition {
    pub(crate) fn holds(self, registers: &Registers) -> bool {
        match self {
            Self::Eq(a, b) => registers.get(a) == registers.get(b),
            Self::Ne(a, b) => registers.get(a) != registers.get(b),
            Self::Zero(reg) => registers.get(reg) == 0,
            Self::NotZero(reg) => registers.get(reg) != 0,
            Self::FlagSet(bit) => registers.flags.contains(bit.mask()),
            Self::FlagClear(bit) => !registers.flags.contains(bit.mask()),
            Self::Cmp(sign, rel, a, b) => {
                compare(sign, rel, registers.get(a), registers.get(b))
            }
            Self::CmpZero(sign, rel, reg) => compare(sign, rel, registers.get(reg), 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Instruction {
    /// No-op
    #[display("nop")]
    Nop,

    /// Latch the halt flag; later steps are no-ops
    #[display("halt")]
    Halt,

    /// Push a value onto the stack
    #[display("push {0}")]
    Push(Value),

    /// Pop a value from the stack
    #[display("pop  {0}")]
    Pop(Reg),

    /// Snapshot the general registers and jump (see the calling convention)
    #[display("call {0}")]
    Call(Value),

    /// Unwind the active frame and restore the snapshot
    #[display("ret")]
    Ret,

    /// Load a register with a value
    #[display("ld   {0}, {1}")]
    Ld(Value, Reg),

    /// Load a register through a register pointer, in the program bank
    #[display("ld   [{0}], {1}")]
    Ldp(Reg, Reg),

    /// Store a value through a register pointer, in the program bank
    #[display("st   {0}, [{1}]")]
    Stp(Value, Reg),

    /// Store a literal at a literal address, in the program bank
    #[display("st   {0}, [{1}]")]
    St(C::Word, C::Address),

    /// Copy a special register into a general one
    #[display("mov  {0}, {1}")]
    Lds(Special, Reg),

    /// Copy a general register into a special one
    #[display("mov  {0}, {1}")]
    Sts(Reg, Special),

    #[display("add  {0}, {1}")]
    Add(Value, Value),

    #[display("sub  {0}, {1}")]
    Sub(Value, Value),

    #[display("mul  {0}, {1}")]
    Mul(Value, Value),

    #[display("div  {0}, {1}")]
    Div(Value, Value),

    #[display("mod  {0}, {1}")]
    Mod(Value, Value),

    #[display("sdiv {0}, {1}")]
    Sdiv(Value, Value),

    #[display("smod {0}, {1}")]
    Smod(Value, Value),

    /// Increment a register in place
    #[display("inc  {0}")]
    Inc(Reg),

    /// Decrement a register in place
    #[display("dec  {0}")]
    Dec(Reg),

    #[display("and  {0}, {1}")]
    And(Value, Value),

    #[display("or   {0}, {1}")]
    Or(Value, Value),

    #[display("xor  {0}, {1}")]
    Xor(Value, Value),

    #[display("not  {0}")]
    Not(Value),

    /// Logical shift left: counts past 16 saturate to zero
    #[display("shl  {0}, {1}")]
    Shl(Reg, Value),

    /// Logical shift right: counts past 16 saturate to zero
    #[display("shr  {0}, {1}")]
    Shr(Reg, Value),

    /// Rotate left: the count wraps modulo 16
    #[display("rol  {0}, {1}")]
    Rol(Reg, Value),

    /// Rotate right: the count wraps modulo 16
    #[display("ror  {0}, {1}")]
    Ror(Reg, Value),

    /// Rotate left through the carry flag
    #[display("rcl  {0}, {1}")]
    Rcl(Reg, Value),

    /// Rotate right through the carry flag
    #[display("rcr  {0}, {1}")]
    Rcr(Reg, Value),

    /// Unconditional jump
    #[display("jmp  {0}")]
    Jmp(Target),

    /// Conditional jump
    #[display("j{0}, {1}")]
    Jump(Condition, Target),
}

impl Instruction {
    /// Decode an instruction word, pulling trailing literal words from
    /// `next` as the form requires.
    ///
    /// # Errors
    ///
    /// Unknown opcode bytes and out-of-range operand selectors are fatal
    /// decode faults.
    pub(crate) fn decode<F>(word: C::Word, mut next: F) -> Result<Self, Exception>
    where
        F: FnMut() -> C::Word,
    {
        let opcode = (word >> 8) as u8;
        let low = (word & 0x00FF) as u8;
        let x = low >> 4;
        let y = low & 0x0F;

        let instruction = match opcode {
            0x00 => Self::Nop,
            0x01 => Self::Halt,
            0x02 => Self::Push(Value::Reg(Reg::from_index(x)?)),
            0x03 => Self::Push(Value::Imm(next())),
            0x04 => Self::Pop(Reg::from_index(x)?),
            0x05 => Self::Call(Value::Imm(next())),
            0x06 => Self::Call(Value::Reg(Reg::from_index(x)?)),
            0x07 => Self::Ret,

            0x10 => Self::Ld(Value::Reg(Reg::from_index(y)?), Reg::from_index(x)?),
            0x11 => Self::Ldp(Reg::from_index(y)?, Reg::from_index(x)?),
            0x12 => Self::Stp(Value::Reg(Reg::from_index(y)?), Reg::from_index(x)?),
            0x13 => Self::Ld(Value::Imm(next()), Reg::from_index(x)?),
            0x14 => Self::Stp(Value::Imm(next()), Reg::from_index(x)?),
            0x15 => {
                let value = next();
                let address = next();
                Self::St(value, address)
            }
            0x16 => Self::Lds(Special::from_index(y)?, Reg::from_index(x)?),
            0x17 => Self::Sts(Reg::from_index(y)?, Special::from_index(x)?),

            0x20 => Self::Add(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x21 => Self::Add(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x22 => Self::Add(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x23 => Self::Sub(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x24 => Self::Sub(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x25 => Self::Sub(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x26 => Self::Inc(Reg::from_index(x)?),
            0x27 => Self::Dec(Reg::from_index(x)?),
            0x28 => Self::Mul(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x29 => Self::Mul(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x2A => Self::Mul(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),

            0x30 => Self::Div(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x31 => Self::Div(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x32 => Self::Div(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x33 => Self::Mod(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x34 => Self::Mod(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x35 => Self::Mod(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x36 => Self::Sdiv(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x37 => Self::Sdiv(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x38 => Self::Sdiv(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x39 => Self::Smod(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x3A => Self::Smod(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x3B => Self::Smod(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),

            0x40 => Self::And(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x41 => Self::And(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x42 => Self::And(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x43 => Self::Or(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x44 => Self::Or(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x45 => Self::Or(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x46 => Self::Xor(Value::Reg(Reg::from_index(x)?), Value::Reg(Reg::from_index(y)?)),
            0x47 => Self::Xor(Value::Reg(Reg::from_index(x)?), Value::Imm(next())),
            0x48 => Self::Xor(Value::Imm(next()), Value::Reg(Reg::from_index(x)?)),
            0x49 => Self::Not(Value::Reg(Reg::from_index(x)?)),
            0x4A => Self::Not(Value::Imm(next())),

            0x50 => Self::Shl(Reg::from_index(x)?, Value::Reg(Reg::from_index(y)?)),
            0x51 => Self::Shl(Reg::from_index(x)?, Value::Imm(next())),
            0x52 => Self::Shr(Reg::from_index(x)?, Value::Reg(Reg::from_index(y)?)),
            0x53 => Self::Shr(Reg::from_index(x)?, Value::Imm(next())),
            0x54 => Self::Rol(Reg::from_index(x)?, Value::Reg(Reg::from_index(y)?)),
            0x55 => Self::Rol(Reg::from_index(x)?, Value::Imm(next())),
            0x56 => Self::Ror(Reg::from_index(x)?, Value::Reg(Reg::from_index(y)?)),
            0x57 => Self::Ror(Reg::from_index(x)?, Value::Imm(next())),
            0x58 => Self::Rcl(Reg::from_index(x)?, Value::Reg(Reg::from_index(y)?)),
            0x59 => Self::Rcl(Reg::from_index(x)?, Value::Imm(next())),
            0x5A => Self::Rcr(Reg::from_index(x)?, Value::Reg(Reg::from_index(y)?)),
            0x5B => Self::Rcr(Reg::from_index(x)?, Value::Imm(next())),

            0x60 => Self::Jmp(Target::Imm(next())),
            0x61 => Self::Jmp(Target::Reg(Reg::from_index(x)?)),
            0x62 => Self::Jmp(Target::ImmPtr(next())),
            0x63 => Self::Jmp(Target::RegPtr(Reg::from_index(x)?)),
            0x64 => Self::Jmp(Target::Offset(next(), Reg::from_index(x)?)),

            0x70..=0x7F => {
                let (condition, two_reg) = match (opcode >> 2) & 0x3 {
                    0 => (Condition::Eq(Reg::from_index(x)?, Reg::from_index(y)?), true),
                    1 => (Condition::Ne(Reg::from_index(x)?, Reg::from_index(y)?), true),
                    2 => (Condition::Zero(Reg::from_index(x)?), false),
                    _ => (Condition::NotZero(Reg::from_index(x)?), false),
                };
                let target = decode_target(opcode, low, two_reg, &mut next)?;
                Self::Jump(condition, target)
            }

            0x80..=0x87 => {
                let flag = FlagBit::from_index(x)?;
                let condition = if opcode & 0b100 == 0 {
                    Condition::FlagSet(flag)
                } else {
                    Condition::FlagClear(flag)
                };
                let target = decode_target(opcode, low, false, &mut next)?;
                Self::Jump(condition, target)
            }

            0x90..=0xCF => {
                let sign = if matches!(opcode & 0xF0, 0xA0 | 0xC0) {
                    Sign::Signed
                } else {
                    Sign::Unsigned
                };
                let rel = match (opcode >> 2) & 0x3 {
                    0 => Rel::Gt,
                    1 => Rel::Lt,
                    2 => Rel::Ge,
                    _ => Rel::Le,
                };
                let vs_zero = opcode >= 0xB0;
                let lhs = Reg::from_index(x)?;
                let condition = if vs_zero {
                    Condition::CmpZero(sign, rel, lhs)
                } else {
                    Condition::Cmp(sign, rel, lhs, Reg::from_index(y)?)
                };
                let target = decode_target(opcode, low, !vs_zero, &mut next)?;
                Self::Jump(condition, target)
            }

            _ => return Err(Exception::UnknownOpcode(opcode)),
        };

        Ok(instruction)
    }

    /// Execute the instruction
    #[tracing::instrument(skip(machine))]
    pub(crate) fn execute(self, machine: &mut Machine) -> Result<(), ProcessorError> {
        use Instruction::{
            Add, And, Call, Dec, Div, Halt, Inc, Jmp, Jump, Ld, Ldp, Lds, Mod, Mul, Nop,
            Not, Or, Pop, Push, Rcl, Rcr, Ret, Rol, Ror, Sdiv, Shl, Shr, Smod, St, Stp,
            Sts, Sub, Xor,
        };

        match self {
            Nop => {}

            Halt => {
                debug!("halting");
                machine.halt();
            }

            Push(value) => {
                let value = machine.value(value);
                debug!("push({value})");
                machine.push(value)?;
                machine.registers.frame_pushes =
                    machine.registers.frame_pushes.wrapping_add(1);
            }

            Pop(reg) => {
                let value = machine.pop();
                debug!("pop() = {value}");
                machine.registers.set(reg, value);
                machine.registers.frame_pushes =
                    machine.registers.frame_pushes.wrapping_sub(1);
            }

            Call(target) => {
                let target = machine.value(target);
                machine.call(target)?;
            }

            Ret => machine.ret()?,

            Ld(value, reg) => {
                let value = machine.value(value);
                machine.registers.set(reg, value);
            }

            Ldp(pointer, reg) => {
                let address = machine.registers.get(pointer);
                let value = machine.program_read(address)?;
                machine.registers.set(reg, value);
            }

            Stp(value, pointer) => {
                let value = machine.value(value);
                let address = machine.registers.get(pointer);
                machine.program_write(address, value)?;
            }

            St(value, address) => {
                machine.program_write(address, value)?;
            }

            Lds(special, reg) => {
                let value = machine.special(special);
                machine.registers.set(reg, value);
            }

            Sts(reg, special) => {
                let value = machine.registers.get(reg);
                machine.set_special(special, value)?;
            }

            Add(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let (res, carry) = a.overflowing_add(b);
                debug!("{a} + {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Sub(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let (res, borrow) = a.overflowing_sub(b);
                debug!("{a} - {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, borrow, true);
            }

            Mul(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let (res, carry) = a.overflowing_mul(b);
                debug!("{a} * {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Div(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let res = a.checked_div(b).ok_or(Exception::DivideByZero)?;
                debug!("{a} / {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, false, false);
            }

            Mod(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let res = a.checked_rem(b).ok_or(Exception::DivideByZero)?;
                debug!("{a} % {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, false, false);
            }

            Sdiv(a, b) => {
                let (a, b) = (machine.value(a) as i16, machine.value(b) as i16);
                if b == 0 {
                    return Err(Exception::DivideByZero.into());
                }
                let (res, carry) = a.overflowing_div(b);
                debug!("{a} / {b} = {res}");
                let res = res as C::Word;
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Smod(a, b) => {
                let (a, b) = (machine.value(a) as i16, machine.value(b) as i16);
                if b == 0 {
                    return Err(Exception::DivideByZero.into());
                }
                let (res, carry) = a.overflowing_rem(b);
                debug!("{a} % {b} = {res}");
                let res = res as C::Word;
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Inc(reg) => {
                let (res, carry) = machine.registers.get(reg).overflowing_add(1);
                machine.registers.set(reg, res);
                machine.update_flags(res, carry, false);
            }

            Dec(reg) => {
                let (res, borrow) = machine.registers.get(reg).overflowing_sub(1);
                machine.registers.set(reg, res);
                machine.update_flags(res, borrow, true);
            }

            And(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let res = a & b;
                debug!("{a} & {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, false, false);
            }

            Or(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let res = a | b;
                debug!("{a} | {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, false, false);
            }

            Xor(a, b) => {
                let (a, b) = (machine.value(a), machine.value(b));
                let res = a ^ b;
                debug!("{a} ^ {b} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, false, false);
            }

            Not(value) => {
                let value = machine.value(value);
                let res = !value;
                debug!("!{value} = {res}");
                machine.registers.acc = res;
                machine.update_flags(res, false, false);
            }

            Shl(reg, count) => {
                let (res, carry) =
                    shift_left(machine.registers.get(reg), machine.value(count));
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Shr(reg, count) => {
                let (res, carry) =
                    shift_right(machine.registers.get(reg), machine.value(count));
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Rol(reg, count) => {
                let (res, carry) =
                    rotate_left(machine.registers.get(reg), machine.value(count));
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Ror(reg, count) => {
                let (res, carry) =
                    rotate_right(machine.registers.get(reg), machine.value(count));
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Rcl(reg, count) => {
                let (res, carry) = rotate_left_through_carry(
                    machine.registers.get(reg),
                    machine.registers.flags.contains(Flags::CARRY),
                    machine.value(count),
                );
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Rcr(reg, count) => {
                let (res, carry) = rotate_right_through_carry(
                    machine.registers.get(reg),
                    machine.registers.flags.contains(Flags::CARRY),
                    machine.value(count),
                );
                machine.registers.acc = res;
                machine.update_flags(res, carry, false);
            }

            Jmp(target) => {
                let address = machine.resolve_target(target)?;
                debug!("jumping to {address}");
                machine.registers.pc = address;
            }

            Jump(condition, target) => {
                // The target is only resolved (and pointer targets only
                // read memory) when the branch is taken
                if condition.holds(&machine.registers) {
                    let address = machine.resolve_target(target)?;
                    debug!("condition holds, jumping to {address}");
                    machine.registers.pc = address;
                }
            }
        }

        Ok(())
    }
}

/// Decode the target of a conditional jump. The two low opcode bits pick
/// the mode; `two_reg` conditions carry a register target in their
/// trailing word because the low byte is spent on the test operands.
fn decode_target<F>(
    opcode: u8,
    low: u8,
    two_reg: bool,
    next: &mut F,
) -> Result<Target, Exception>
where
    F: FnMut() -> C::Word,
{
    Ok(match opcode & 0x3 {
        0 => Target::Imm(next()),
        2 => Target::ImmPtr(next()),
        mode => {
            let index = if two_reg {
                (next() & 0x000F) as u8
            } else {
                low & 0x0F
            };
            let reg = Reg::from_index(index)?;
            if mode == 1 {
                Target::Reg(reg)
            } else {
                Target::RegPtr(reg)
            }
        }
    })
}

fn shift_left(value: C::Word, count: C::Word) -> (C::Word, bool) {
    match count {
        0 => (value, false),
        1..=16 => {
            let carry = (value >> (16 - count)) & 1 == 1;
            let shifted = if count == 16 { 0 } else { value << count };
            (shifted, carry)
        }
        // Saturate: every bit has been shifted out, including the carry
        _ => (0, false),
    }
}

fn shift_right(value: C::Word, count: C::Word) -> (C::Word, bool) {
    match count {
        0 => (value, false),
        1..=16 => {
            let carry = (value >> (count - 1)) & 1 == 1;
            let shifted = if count == 16 { 0 } else { value >> count };
            (shifted, carry)
        }
        _ => (0, false),
    }
}

fn rotate_left(value: C::Word, count: C::Word) -> (C::Word, bool) {
    let count = count % 16;
    if count == 0 {
        return (value, false);
    }
    let rotated = value.rotate_left(u32::from(count));
    // The last bit out of the top is the one that landed at bit 0
    (rotated, rotated & 1 == 1)
}

fn rotate_right(value: C::Word, count: C::Word) -> (C::Word, bool) {
    let count = count % 16;
    if count == 0 {
        return (value, false);
    }
    let rotated = value.rotate_right(u32::from(count));
    (rotated, rotated & 0x8000 != 0)
}

fn rotate_left_through_carry(
    mut value: C::Word,
    mut carry: bool,
    count: C::Word,
) -> (C::Word, bool) {
    for _ in 0..count % 16 {
        let out = value & 0x8000 != 0;
        value = (value << 1) | C::Word::from(carry);
        carry = out;
    }
    (value, carry)
}

fn rotate_right_through_carry(
    mut value: C::Word,
    mut carry: bool,
    count: C::Word,
) -> (C::Word, bool) {
    for _ in 0..count % 16 {
        let out = value & 1 != 0;
        value = (value >> 1) | (C::Word::from(carry) << 15);
        carry = out;
    }
    (value, carry)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn word(opcode: u8, x: u8, y: u8) -> C::Word {
        C::Word::from(opcode) << 8 | C::Word::from(x << 4 | y)
    }

    fn decode(words: &[C::Word]) -> Result<Instruction, Exception> {
        let mut trailing = words[1..].iter().copied();
        Instruction::decode(words[0], || trailing.next().unwrap_or(0))
    }

    #[test]
    fn decode_control() {
        assert_eq!(decode(&[word(0x00, 0, 0)]), Ok(Instruction::Nop));
        assert_eq!(decode(&[word(0x01, 0, 0)]), Ok(Instruction::Halt));
        assert_eq!(
            decode(&[word(0x02, 3, 0)]),
            Ok(Instruction::Push(Value::Reg(Reg::R3)))
        );
        assert_eq!(
            decode(&[word(0x03, 0, 0), 0x1234]),
            Ok(Instruction::Push(Value::Imm(0x1234)))
        );
        assert_eq!(decode(&[word(0x04, 8, 0)]), Ok(Instruction::Pop(Reg::Acc)));
        assert_eq!(
            decode(&[word(0x05, 0, 0), 0x0200]),
            Ok(Instruction::Call(Value::Imm(0x0200)))
        );
        assert_eq!(
            decode(&[word(0x06, 7, 0)]),
            Ok(Instruction::Call(Value::Reg(Reg::R7)))
        );
        assert_eq!(decode(&[word(0x07, 0, 0)]), Ok(Instruction::Ret));
    }

    #[test]
    fn decode_moves() {
        assert_eq!(
            decode(&[word(0x10, 1, 2)]),
            Ok(Instruction::Ld(Value::Reg(Reg::R2), Reg::R1))
        );
        assert_eq!(
            decode(&[word(0x11, 1, 2)]),
            Ok(Instruction::Ldp(Reg::R2, Reg::R1))
        );
        assert_eq!(
            decode(&[word(0x12, 1, 2)]),
            Ok(Instruction::Stp(Value::Reg(Reg::R2), Reg::R1))
        );
        assert_eq!(
            decode(&[word(0x13, 4, 0), 0x4242]),
            Ok(Instruction::Ld(Value::Imm(0x4242), Reg::R4))
        );
        assert_eq!(
            decode(&[word(0x14, 5, 0), 0x0001]),
            Ok(Instruction::Stp(Value::Imm(0x0001), Reg::R5))
        );
        // Literal-to-literal-address: value first, then address
        assert_eq!(
            decode(&[word(0x15, 0, 0), 0x00AB, 0x1000]),
            Ok(Instruction::St(0x00AB, 0x1000))
        );
        assert_eq!(
            decode(&[word(0x16, 2, 0)]),
            Ok(Instruction::Lds(Special::Sp, Reg::R2))
        );
        assert_eq!(
            decode(&[word(0x17, 2, 3)]),
            Ok(Instruction::Sts(Reg::R3, Special::Bank))
        );
    }

    #[test]
    fn decode_arithmetic_shapes() {
        assert_eq!(
            decode(&[word(0x20, 1, 2)]),
            Ok(Instruction::Add(Value::Reg(Reg::R1), Value::Reg(Reg::R2)))
        );
        assert_eq!(
            decode(&[word(0x21, 1, 0), 7]),
            Ok(Instruction::Add(Value::Reg(Reg::R1), Value::Imm(7)))
        );
        assert_eq!(
            decode(&[word(0x22, 1, 0), 7]),
            Ok(Instruction::Add(Value::Imm(7), Value::Reg(Reg::R1)))
        );
        assert_eq!(decode(&[word(0x26, 6, 0)]), Ok(Instruction::Inc(Reg::R6)));
        assert_eq!(decode(&[word(0x27, 6, 0)]), Ok(Instruction::Dec(Reg::R6)));
        assert_eq!(
            decode(&[word(0x38, 2, 0), 0xFFFE]),
            Ok(Instruction::Sdiv(Value::Imm(0xFFFE), Value::Reg(Reg::R2)))
        );
    }

    #[test]
    fn decode_shifts() {
        assert_eq!(
            decode(&[word(0x50, 1, 2)]),
            Ok(Instruction::Shl(Reg::R1, Value::Reg(Reg::R2)))
        );
        assert_eq!(
            decode(&[word(0x5B, 1, 0), 3]),
            Ok(Instruction::Rcr(Reg::R1, Value::Imm(3)))
        );
    }

    #[test]
    fn decode_unconditional_jumps() {
        assert_eq!(
            decode(&[word(0x60, 0, 0), 0x0100]),
            Ok(Instruction::Jmp(Target::Imm(0x0100)))
        );
        assert_eq!(
            decode(&[word(0x61, 3, 0)]),
            Ok(Instruction::Jmp(Target::Reg(Reg::R3)))
        );
        assert_eq!(
            decode(&[word(0x62, 0, 0), 0x0100]),
            Ok(Instruction::Jmp(Target::ImmPtr(0x0100)))
        );
        assert_eq!(
            decode(&[word(0x63, 3, 0)]),
            Ok(Instruction::Jmp(Target::RegPtr(Reg::R3)))
        );
        assert_eq!(
            decode(&[word(0x64, 3, 0), 0x0100]),
            Ok(Instruction::Jmp(Target::Offset(0x0100, Reg::R3)))
        );
    }

    #[test]
    fn decode_conditional_jumps() {
        assert_eq!(
            decode(&[word(0x70, 1, 2), 0x0100]),
            Ok(Instruction::Jump(
                Condition::Eq(Reg::R1, Reg::R2),
                Target::Imm(0x0100)
            ))
        );
        // Two-register conditions name their register target in the
        // trailing word
        assert_eq!(
            decode(&[word(0x71, 1, 2), 0x0005]),
            Ok(Instruction::Jump(
                Condition::Eq(Reg::R1, Reg::R2),
                Target::Reg(Reg::R5)
            ))
        );
        // Single-operand conditions keep it in the low nibble
        assert_eq!(
            decode(&[word(0x79, 3, 5)]),
            Ok(Instruction::Jump(
                Condition::Zero(Reg::R3),
                Target::Reg(Reg::R5)
            ))
        );
        assert_eq!(
            decode(&[word(0x7F, 3, 5)]),
            Ok(Instruction::Jump(
                Condition::NotZero(Reg::R3),
                Target::RegPtr(Reg::R5)
            ))
        );
        assert_eq!(
            decode(&[word(0x80, 1, 0), 0x0300]),
            Ok(Instruction::Jump(
                Condition::FlagSet(FlagBit::Carry),
                Target::Imm(0x0300)
            ))
        );
        assert_eq!(
            decode(&[word(0x86, 2, 0), 0x0300]),
            Ok(Instruction::Jump(
                Condition::FlagClear(FlagBit::Zero),
                Target::ImmPtr(0x0300)
            ))
        );
        assert_eq!(
            decode(&[word(0x90, 1, 2), 0x0100]),
            Ok(Instruction::Jump(
                Condition::Cmp(Sign::Unsigned, Rel::Gt, Reg::R1, Reg::R2),
                Target::Imm(0x0100)
            ))
        );
        assert_eq!(
            decode(&[word(0xAF, 1, 2), 0x0004]),
            Ok(Instruction::Jump(
                Condition::Cmp(Sign::Signed, Rel::Le, Reg::R1, Reg::R2),
                Target::RegPtr(Reg::R4)
            ))
        );
        assert_eq!(
            decode(&[word(0xB0, 6, 0), 0x0100]),
            Ok(Instruction::Jump(
                Condition::CmpZero(Sign::Unsigned, Rel::Gt, Reg::R6),
                Target::Imm(0x0100)
            ))
        );
        assert_eq!(
            decode(&[word(0xC5, 6, 3)]),
            Ok(Instruction::Jump(
                Condition::CmpZero(Sign::Signed, Rel::Lt, Reg::R6),
                Target::Reg(Reg::R3)
            ))
        );
    }

    #[test]
    fn decode_faults() {
        assert_eq!(
            decode(&[word(0x08, 0, 0)]),
            Err(Exception::UnknownOpcode(0x08))
        );
        assert_eq!(
            decode(&[word(0xD0, 0, 0)]),
            Err(Exception::UnknownOpcode(0xD0))
        );
        assert_eq!(
            decode(&[word(0xFF, 0, 0)]),
            Err(Exception::UnknownOpcode(0xFF))
        );
        // Selector 12 names no register
        assert_eq!(
            decode(&[word(0x02, 12, 0)]),
            Err(Exception::InvalidRegister(12))
        );
        // Selector 3 names no special register
        assert_eq!(
            decode(&[word(0x16, 0, 3)]),
            Err(Exception::InvalidSpecial(3))
        );
        // Selector 4 names no flag
        assert_eq!(decode(&[word(0x80, 4, 0)]), Err(Exception::InvalidFlag(4)));
    }

    #[test]
    fn shift_left_policy() {
        assert_eq!(shift_left(0b1111_0000_1010_1001, 4), (0b0000_1010_1001_0000, true));
        assert_eq!(shift_left(0x0001, 0), (0x0001, false));
        assert_eq!(shift_left(0x0001, 15), (0x8000, false));
        assert_eq!(shift_left(0x0001, 16), (0, true));
        assert_eq!(shift_left(0x8000, 1), (0, true));
        // Counts past 16 saturate instead of wrapping
        assert_eq!(shift_left(0xFFFF, 17), (0, false));
        assert_eq!(shift_left(0xFFFF, 100), (0, false));
    }

    #[test]
    fn shift_right_policy() {
        assert_eq!(shift_right(0b1010, 1), (0b0101, false));
        assert_eq!(shift_right(0b1011, 1), (0b0101, true));
        assert_eq!(shift_right(0x8000, 16), (0, true));
        assert_eq!(shift_right(0xFFFF, 17), (0, false));
    }

    #[test]
    fn rotate_wraps_modulo_16() {
        assert_eq!(rotate_left(0x8001, 1), (0x0003, true));
        assert_eq!(rotate_right(0x8001, 1), (0xC000, true));
        // A full turn is the identity, and so is any multiple
        assert_eq!(rotate_left(0x1234, 16), (0x1234, false));
        assert_eq!(rotate_left(0x8001, 17), (0x0003, true));
        assert_eq!(rotate_right(0x8001, 33), (0xC000, true));
    }

    #[test]
    fn rotate_through_carry_threads_the_flag() {
        // 17-bit rotation: the carry becomes bit 0, bit 15 becomes the carry
        assert_eq!(rotate_left_through_carry(0x8000, false, 1), (0x0000, true));
        assert_eq!(rotate_left_through_carry(0x0000, true, 1), (0x0001, false));
        assert_eq!(rotate_right_through_carry(0x0001, false, 1), (0x0000, true));
        assert_eq!(rotate_right_through_carry(0x0000, true, 1), (0x8000, false));
        // Count 0 (or a full wrap) leaves both value and carry untouched
        assert_eq!(rotate_left_through_carry(0x1234, true, 16), (0x1234, true));
    }

    #[test]
    fn display_mnemonics() {
        assert_eq!(Instruction::Nop.to_string(), "nop");
        assert_eq!(
            Instruction::Add(Value::Reg(Reg::R1), Value::Imm(7)).to_string(),
            "add  %r1, 7"
        );
        assert_eq!(
            Instruction::Ldp(Reg::R2, Reg::R1).to_string(),
            "ld   [%r2], %r1"
        );
        assert_eq!(
            Instruction::Jump(Condition::Eq(Reg::R1, Reg::R2), Target::Imm(0x0100))
                .to_string(),
            "jeq %r1, %r2, 256"
        );
        assert_eq!(
            Instruction::Jump(
                Condition::Cmp(Sign::Signed, Rel::Gt, Reg::R1, Reg::R2),
                Target::Reg(Reg::R3)
            )
            .to_string(),
            "jsgt %r1, %r2, %r3"
        );
        assert_eq!(
            Instruction::Jump(
                Condition::FlagSet(FlagBit::Carry),
                Target::Imm(0x0300)
            )
            .to_string(),
            "jcs, 768"
        );
    }
}
