//! Core types and constants for the geospatial anchor core

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
