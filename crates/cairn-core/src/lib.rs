//! cairn-core — shared types for the cairn storage node.
//! The daemon crate depends on this one.

pub mod config;
pub mod parity;
pub mod store;
pub mod wire;

pub use parity::ParityByte;
pub use store::{ByteStore, DATA_SIZE};
pub use wire::{BlockRequest, BLOCK_LEN};
