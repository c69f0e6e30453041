mod value;
pub use value::*;
mod emit;
pub use emit::*;
