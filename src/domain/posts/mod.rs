//! Post domain - models and queries for draft, scheduled, and published posts

pub mod models;
pub mod queries;

// Re-export models for convenience
pub use models::*;
