//! Domain data: entity states, their commands and replies.

pub mod cart;
pub mod wallet;

pub use cart::*;
pub use wallet::*;
