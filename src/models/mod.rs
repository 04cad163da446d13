//! Core data models for chanscope.

mod config;
mod error;
mod post;
mod record;

pub use config::*;
pub use error::*;
pub use post::*;
pub use record::*;
