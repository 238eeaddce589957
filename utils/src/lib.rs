//! Shared infrastructure utilities for filesys.
//!
//! This crate provides cross-cutting utilities that multiple filesys crates need
//! but that don't belong in the domain-pure `filesys-types` crate:
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)

pub mod atomic_write;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, PersistMode, atomic_write, atomic_write_with_options,
};
