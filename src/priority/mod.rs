//! Priority list storage and device resolution.

mod resolver;
mod store;

pub use resolver::{resolve, ResolvedSelection};
pub use store::{PriorityEntry, PriorityStore};
