//! Core data model for bundle reconciliation.

mod bundle;
pub use bundle::*;
mod contracts;
pub use contracts::*;
mod event;
pub use event::*;
mod leaf;
pub use leaf::*;
