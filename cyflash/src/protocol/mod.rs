//! Protocol implementations.

pub mod crc;
pub mod xmodem;

// Re-export common types
pub use xmodem::{BLOCK_SIZE, StartMode, XmodemConfig, XmodemTransfer};
