mod cell;
mod roots;

pub use cell::*;
pub use roots::*;
