//! Message types shared by the Context Window Manager and Response Planner.

mod types;

pub use types::{Message, Role};
