//! The Playout Engine (spec §4.2): `next_item(channel, now)` over a
//! channel's blocks, collections, enumerators, and filler policy.

pub mod engine;
pub mod enumerator;
pub mod filler;
pub mod smart_collection;

pub use engine::{NextItem, PlayoutEngine};
