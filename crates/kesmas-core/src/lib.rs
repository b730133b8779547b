//! Core types for the Kesmas health-statistics warehouse.
//!
//! This crate is deliberately free of database and file-system dependencies.
//! It holds the staging record shape, the dimension and fact row types, the
//! audit entry, and the pure arithmetic of the assumption dimension. The
//! `kesmas-warehouse` crate does all I/O on top of it.

pub mod audit;
pub mod dimension;
pub mod error;
pub mod fact;
pub mod mart;
pub mod numeric;
pub mod record;

pub use error::{Error, Result};
