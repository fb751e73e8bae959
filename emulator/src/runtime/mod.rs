use parse_display::Display;
use thiserror::Error;
use tracing::debug;

use crate::constants as C;

mod exception;
mod instructions;
mod memory;
mod registers;
mod video;

pub use self::exception::Exception;
pub use self::instructions::{Condition, Instruction, Rel, Sign};
pub use self::memory::{Memory, MemoryError, Region};
pub use self::registers::{FlagBit, Flags, Reg, Registers, Special};
pub use self::video::Color;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("CPU exception: {0}")]
    Exception(#[from] Exception),
}

// Implement a MemoryError -> ProcessorError conversion to simplify code
impl From<MemoryError> for ProcessorError {
    fn from(e: MemoryError) -> Self {
        Self::Exception(Exception::InvalidMemoryAccess(e))
    }
}

type Result<T> = std::result::Result<T, ProcessorError>;

/// An immediate word or a register operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Value {
    #[display("{0}")]
    Imm(C::Word),

    #[display("{0}")]
    Reg(Reg),
}

/// Where a jump lands, and how the address is obtained.
///
/// Pointer targets read the destination address through the bank the
/// program last selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Target {
    #[display("{0}")]
    Imm(C::Address),

    #[display("{0}")]
    Reg(Reg),

    #[display("[{0}]")]
    ImmPtr(C::Address),

    #[display("[{0}]")]
    RegPtr(Reg),

    #[display("{0}+{1}")]
    Offset(C::Address, Reg),
}

/// The Ikaros machine: register file, banked memory and the execution
/// engine.
///
/// A driver loads a flat word image with [`Machine::load_image`] and calls
/// [`Machine::step`] until [`Machine::halted`] reports true. Every fault is
/// fatal and latches the halt flag; [`Machine::reset`] clears the CPU state
/// (memory is preserved) so a fresh image can be run.
#[derive(Default, Clone)]
pub struct Machine {
    pub registers: Registers,
    pub memory: Memory,
    halted: bool,
    call_depth: usize,
    steps: usize,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Machine {{ registers: {:?}, halted: {}, memory: [...] }}",
            self.registers, self.halted
        )
    }
}

impl Machine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a flat binary image into the main store, starting at address 0.
    ///
    /// # Errors
    ///
    /// Fails if the image is larger than the main store.
    pub fn load_image(&mut self, image: &[C::Word]) -> std::result::Result<(), MemoryError> {
        self.memory.load_image(image)
    }

    /// Whether the machine has halted, by instruction or by fault
    #[must_use]
    pub const fn halted(&self) -> bool {
        self.halted
    }

    /// Number of instructions executed since the last reset
    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// The region pointer moves currently address.
    ///
    /// # Errors
    ///
    /// Fails if the program stored a value in the selector word that names
    /// no region.
    pub fn bank(&self) -> std::result::Result<Region, MemoryError> {
        self.memory.bank()
    }

    /// Read-only view of an arbitrary word in any bank, for debugger and
    /// display collaborators
    #[must_use]
    pub fn inspect(&self, region: Region, address: C::Address) -> C::Word {
        self.memory.read(region, address)
    }

    /// Clear every register, the flags, the halt latch and the step
    /// counter. Memory (including the bank-selector word) is preserved:
    /// the loaded image runs again from address 0.
    pub fn reset(&mut self) {
        self.registers.reset();
        self.halted = false;
        self.call_depth = 0;
        self.steps = 0;
    }

    /// Execute one fetch-decode-execute cycle.
    ///
    /// Stepping a halted machine is a no-op.
    ///
    /// # Errors
    ///
    /// Every fault is fatal: the halt flag is latched before the fault
    /// propagates, and partial state mutated by the faulting instruction
    /// is not rolled back.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn step(&mut self) -> Result<()> {
        if self.halted {
            debug!("machine is halted, ignoring step");
            return Ok(());
        }

        let result = self.step_inner();
        if result.is_err() {
            self.halted = true;
        }
        result
    }

    fn step_inner(&mut self) -> Result<()> {
        let pc = self.registers.pc;
        let word = self.fetch();
        let instruction = Instruction::decode(word, || self.fetch())?;
        debug!(pc, "executing \"{instruction}\"");
        instruction.execute(self)?;
        self.steps += 1;
        Ok(())
    }

    /// Step until the machine halts.
    ///
    /// # Errors
    ///
    /// Stops at the first fault and propagates it.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> Result<()> {
        while !self.halted {
            self.step()?;
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.halted = true;
    }

    /// Fetch the word at the program counter and advance it. Fetches
    /// always read Main: code cannot be banked away by the program.
    fn fetch(&mut self) -> C::Word {
        let word = self.memory.read(Region::Main, self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        word
    }

    fn value(&self, value: Value) -> C::Word {
        match value {
            Value::Imm(word) => word,
            Value::Reg(reg) => self.registers.get(reg),
        }
    }

    /// Read a word through the bank the program last selected
    fn program_read(&self, address: C::Address) -> Result<C::Word> {
        let region = self.memory.bank()?;
        Ok(self.memory.read(region, address))
    }

    /// Write a word through the bank the program last selected
    fn program_write(&mut self, address: C::Address, value: C::Word) -> Result<()> {
        let region = self.memory.bank()?;
        self.memory.write(region, address, value)?;
        Ok(())
    }

    fn resolve_target(&self, target: Target) -> Result<C::Address> {
        Ok(match target {
            Target::Imm(address) => address,
            Target::Reg(reg) => self.registers.get(reg),
            Target::ImmPtr(address) => self.program_read(address)?,
            Target::RegPtr(reg) => self.program_read(self.registers.get(reg))?,
            Target::Offset(base, reg) => base.wrapping_add(self.registers.get(reg)),
        })
    }

    fn special(&self, special: Special) -> C::Word {
        match special {
            Special::Sp => self.registers.sp,
            Special::Fp => self.registers.fp,
            Special::Bank => self.memory.read(Region::Main, C::BANK_SELECTOR),
        }
    }

    fn set_special(&mut self, special: Special, value: C::Word) -> Result<()> {
        match special {
            Special::Sp => self.registers.sp = value,
            Special::Fp => self.registers.fp = value,
            Special::Bank => {
                self.memory.write(Region::Main, C::BANK_SELECTOR, value)?;
            }
        }
        Ok(())
    }

    fn update_flags(&mut self, result: C::Word, carry: bool, subtract_like: bool) {
        let flags = &mut self.registers.flags;
        flags.set(Flags::ZERO, result == 0);
        flags.set(Flags::CARRY, carry);
        flags.set(Flags::NEGATIVE, subtract_like);
    }

    /// Write a word at the stack pointer and advance it. The stack grows
    /// upward from address 0 in its own region.
    #[tracing::instrument(skip(self))]
    fn push(&mut self, value: C::Word) -> Result<()> {
        self.memory
            .write(Region::Stack, self.registers.sp, value)?;
        self.registers.sp = self.registers.sp.wrapping_add(1);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn pop(&mut self) -> C::Word {
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        let value = self.memory.read(Region::Stack, self.registers.sp);
        debug!("popping value {value}");
        value
    }

    /// Enter a subroutine.
    ///
    /// By the time this runs the caller has pushed its argument words and
    /// the argument count. The machine snapshots the general register
    /// file, the flags and the return address, then seals the frame with
    /// the frame-continuation counter: the caller's own push count, which
    /// is what lets `ret` walk the frame pointer back out.
    #[tracing::instrument(skip(self))]
    fn call(&mut self, target: C::Address) -> Result<()> {
        debug!("calling {target}");
        for reg in Reg::GENERAL {
            let value = self.registers.get(reg);
            self.push(value)?;
        }
        self.push(self.registers.flags.bits())?;
        self.push(self.registers.pc)?;
        self.push(self.registers.frame_pushes)?;

        self.registers.fp = self.registers.sp;
        self.registers.frame_pushes = 0;
        self.registers.pc = target;
        self.call_depth += 1;
        Ok(())
    }

    /// Leave a subroutine, reversing [`Machine::call`] exactly.
    ///
    /// The snapshot is the preservation: every general register is
    /// overwritten from the frame, callees never save anything. Only the
    /// accumulator survives, carrying the return value.
    #[tracing::instrument(skip(self))]
    fn ret(&mut self) -> Result<()> {
        if self.call_depth == 0 {
            return Err(Exception::UnmatchedReturn.into());
        }
        self.call_depth -= 1;

        // Drop whatever the callee left on top of its frame
        self.registers.sp = self.registers.fp;

        let continuation = self.pop();
        let ret = self.pop();
        let flags = self.pop();
        for reg in Reg::GENERAL.iter().rev() {
            let value = self.pop();
            self.registers.set(*reg, value);
        }
        let argc = self.pop();
        // Discard the caller's arguments
        self.registers.sp = self.registers.sp.wrapping_sub(argc);

        self.registers.pc = ret;
        self.registers.flags = Flags::from_bits_truncate(flags);
        // Walk the frame pointer back out past the snapshot, the
        // discarded arguments and the caller's remaining pushes
        self.registers.fp = self
            .registers
            .fp
            .wrapping_sub(C::FRAME_WORDS)
            .wrapping_sub(continuation);
        self.registers.frame_pushes = continuation.wrapping_sub(argc).wrapping_sub(1);

        debug!("returning to {ret}");
        Ok(())
    }
}
