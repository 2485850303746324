mod address;
mod tagged_value;

pub use address::*;
pub use tagged_value::*;
