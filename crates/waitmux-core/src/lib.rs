pub mod atomic_write;
pub mod paths;

pub use atomic_write::{atomic_write, atomic_write_json};
pub use paths::*;
