//! Client-side state persistence

pub mod settings;

pub use settings::Settings;
