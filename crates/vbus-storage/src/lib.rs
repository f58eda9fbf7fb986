//! SQLite-backed storage for decoded VBUS measurements
//!
//! Snapshots of decoded readings are flattened into one row per field,
//! with the numeric value and unit split out so dashboards can chart them
//! without re-parsing strings.

pub mod store;
pub mod value;

pub use store::{MeasurementRow, MeasurementStore, StoreError};
pub use value::split_value_unit;
