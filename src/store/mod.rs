//! Storage module for netpulse.
//!
//! In-memory history and uptime state, plus the JSON files they are
//! flushed to.

mod files;
mod history;
mod models;
mod uptime;

pub use files::*;
pub use history::*;
pub use models::*;
pub use uptime::*;
