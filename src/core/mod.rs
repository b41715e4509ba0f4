//! Application-level pieces around the conversion core
//!
//! - Persisted settings
//! - Input discovery and display formatting

mod scanning;
mod settings;

pub use scanning::{collect_inputs, format_hms, format_size_mb, total_after_conversion};
pub use settings::Settings;
