pub mod constants;
pub mod runtime;

pub use self::runtime::{Machine, ProcessorError};
