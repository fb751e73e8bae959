use thiserror::Error;

use super::memory::MemoryError;

/// Faults raised while stepping. All of them are fatal: the machine latches
/// its halt flag before the fault propagates, and only a reset recovers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("invalid register index {0}")]
    InvalidRegister(u8),

    #[error("invalid special register index {0}")]
    InvalidSpecial(u8),

    #[error("invalid flag index {0}")]
    InvalidFlag(u8),

    #[error("division by zero")]
    DivideByZero,

    #[error("return without a matching call")]
    UnmatchedReturn,

    #[error("invalid memory access ({0})")]
    InvalidMemoryAccess(#[from] MemoryError),
}
