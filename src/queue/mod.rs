//! Durable stage streams with consumer groups
//!
//! Each pipeline stage reads from its own append-only stream through a consumer group.
//! An entry delivered to one consumer stays in the group's pending set until it is
//! acknowledged; entries whose consumer went quiet for longer than the claim timeout can
//! be claimed by another consumer, and entries that keep failing are dead-lettered.
//!
//! ## Submodules
//!
//! - [`message`] - the versioned [`StreamMessage`] schema
//! - [`traits`] - the [`StreamQueue`] seam and [`Delivery`]
//! - [`sqlite`] - [`SqliteStreamQueue`], backed by the pipeline database

pub mod message;
pub mod sqlite;
pub mod traits;

pub use message::{SCHEMA_VERSION, StreamMessage};
pub use sqlite::{DeadLetter, SqliteStreamQueue};
pub use traits::{Delivery, StreamQueue};
