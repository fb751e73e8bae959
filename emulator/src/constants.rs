pub type Address = u16;
pub type Word = u16;

/// Number of words in each physical memory store
pub const REGION_SIZE: usize = 1 << 16;

/// Number of general purpose registers
pub const GENERAL_COUNT: usize = 8;

/// Address of the bank-selector word, exempt from banking
pub const BANK_SELECTOR: Address = 0xFFFF;

/// Framebuffer geometry, in pixels
pub const SCREEN_WIDTH: usize = 64;
pub const SCREEN_HEIGHT: usize = 48;

/// Words of the video store covered by the framebuffer
pub const FRAMEBUFFER_WORDS: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

/// Words a `call` pushes: the eight general registers, the flags word, the
/// return address and the frame-continuation counter
pub const FRAME_WORDS: Word = 11;
