//! HTTP API handlers.
//!
//! Defines the Actix routes for uploads, progress streaming and downloads.

pub mod download;
pub mod health;
pub mod separate;
pub mod streams;

pub use download::*;
pub use health::*;
pub use separate::*;
