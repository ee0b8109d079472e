//! Data validation and error classification

pub mod data;
pub mod error;

pub use data::{DataValidator, ValidationConfig};
pub use error::{GeoAnchorError, GeoAnchorResult};
