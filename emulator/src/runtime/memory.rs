//! The banked memory.
//!
//! One 16-bit address space multiplexes three physical word stores: `main`
//! (code and data, plus the bank-selector word at the top address), `stack`
//! (call frames) and `video` (the framebuffer). Which store an access hits
//! is decided by the [`Region`] passed to the accessor, never by hidden
//! state: the engine passes the program-selected region for pointer
//! traffic and forces `Main`, `Stack` or `Pixel` for fetches, stack
//! traffic and display sampling respectively.
//!
//! The top address is the one exception to banking: it always resolves to
//! the selector word in `main`, whatever region is passed. Writing it is
//! how a running program switches banks.

use parse_display::Display;
use thiserror::Error;

use crate::constants as C;

/// One of the resolvable views over the physical stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum Region {
    Main,
    Stack,
    Video,

    /// Read-only view of the video store, reserved for display sampling
    Pixel,
}

impl Region {
    /// Decode a bank-selector word.
    ///
    /// # Errors
    ///
    /// Selector values other than 0, 1 and 2 fault at the access that
    /// tries to resolve them. [`Region::Pixel`] is never program-visible.
    pub(crate) fn from_selector(selector: C::Word) -> Result<Self, MemoryError> {
        match selector {
            0 => Ok(Self::Main),
            1 => Ok(Self::Stack),
            2 => Ok(Self::Video),
            _ => Err(MemoryError::UnknownBank(selector)),
        }
    }
}

/// Represents errors related to memory manipulations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The bank-selector word does not name a region
    #[error("unknown bank selector {0}")]
    UnknownBank(C::Word),

    /// A write went through an observer-only region
    #[error("write through read-only region {0}")]
    ReadOnlyRegion(Region),

    /// A binary image does not fit in the main store
    #[error("image of {len} words does not fit in main memory")]
    ImageTooLarge { len: usize },

    /// A pixel sample outside the framebuffer
    #[error("pixel ({x}, {y}) is outside the screen")]
    OutOfScreen { x: usize, y: usize },
}

/// Holds the physical word stores of the machine.
///
/// Every store spans the full 16-bit address space, so reads cannot go out
/// of bounds and are infallible.
pub struct Memory {
    main: Box<[C::Word; C::REGION_SIZE]>,
    stack: Box<[C::Word; C::REGION_SIZE]>,
    video: Box<[C::Word; C::REGION_SIZE]>,
}

fn zeroed_store() -> Box<[C::Word; C::REGION_SIZE]> {
    vec![0; C::REGION_SIZE]
        .into_boxed_slice()
        .try_into()
        .unwrap()
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            main: zeroed_store(),
            stack: zeroed_store(),
            video: zeroed_store(),
        }
    }
}

// Keep the stores off the stack when cloning
impl Clone for Memory {
    fn clone(&self) -> Self {
        let mut new = Self::default();
        new.main.copy_from_slice(&self.main[..]);
        new.stack.copy_from_slice(&self.stack[..]);
        new.video.copy_from_slice(&self.video[..]);
        new
    }
}

impl Memory {
    fn store(&self, region: Region) -> &[C::Word; C::REGION_SIZE] {
        match region {
            Region::Main => &self.main,
            Region::Stack => &self.stack,
            Region::Video | Region::Pixel => &self.video,
        }
    }

    fn store_mut(
        &mut self,
        region: Region,
    ) -> Result<&mut [C::Word; C::REGION_SIZE], MemoryError> {
        match region {
            Region::Main => Ok(&mut self.main),
            Region::Stack => Ok(&mut self.stack),
            Region::Video => Ok(&mut self.video),
            Region::Pixel => Err(MemoryError::ReadOnlyRegion(region)),
        }
    }

    /// Read the word at an address, resolved against the given region.
    ///
    /// The top address always reads the bank-selector word in `main`.
    #[must_use]
    pub fn read(&self, region: Region, address: C::Address) -> C::Word {
        if address == C::BANK_SELECTOR {
            return self.main[usize::from(C::BANK_SELECTOR)];
        }

        self.store(region)[usize::from(address)]
    }

    /// Write a word at an address, resolved against the given region.
    ///
    /// The top address always writes the bank-selector word in `main`,
    /// whatever region is passed.
    ///
    /// # Errors
    ///
    /// Writing through [`Region::Pixel`] is a fault: that view is reserved
    /// for observers.
    pub fn write(
        &mut self,
        region: Region,
        address: C::Address,
        value: C::Word,
    ) -> Result<(), MemoryError> {
        if address == C::BANK_SELECTOR {
            self.main[usize::from(C::BANK_SELECTOR)] = value;
            return Ok(());
        }

        self.store_mut(region)?[usize::from(address)] = value;
        Ok(())
    }

    /// The region the program currently addresses through pointer moves.
    ///
    /// # Errors
    ///
    /// Fails if the selector word holds a value that names no region.
    pub fn bank(&self) -> Result<Region, MemoryError> {
        Region::from_selector(self.main[usize::from(C::BANK_SELECTOR)])
    }

    /// Copy a flat binary image into the main store, starting at address 0.
    ///
    /// # Errors
    ///
    /// Fails if the image is larger than the store.
    pub fn load_image(&mut self, image: &[C::Word]) -> Result<(), MemoryError> {
        if image.len() > C::REGION_SIZE {
            return Err(MemoryError::ImageTooLarge { len: image.len() });
        }

        self.main[..image.len()].copy_from_slice(image);
        Ok(())
    }
}
