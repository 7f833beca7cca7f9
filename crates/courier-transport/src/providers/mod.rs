//! Transport implementations.
//!
//! This module contains concrete implementations of the `Producer`, `Consumer`
//! and `Transport` traits.

pub mod memory;

pub use memory::{InMemoryBroker, InMemoryConsumer, InMemoryProducer};
