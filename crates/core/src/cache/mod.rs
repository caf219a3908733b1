//! Local, observable entity cache and the soft-delete grace window.

mod cache_model;
mod entity_cache;
mod soft_delete;

pub use cache_model::*;
pub use entity_cache::*;
pub use soft_delete::*;
