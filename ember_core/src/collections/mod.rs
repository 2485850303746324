mod ordered_map;
mod ordered_set;
pub use ordered_map::*;
pub use ordered_set::*;
