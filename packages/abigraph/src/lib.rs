/// Algorithms that rewrite the ABI graph in place
pub mod algorithm;

mod offset;
pub use offset::*;
mod str;
pub use str::*;
mod die;
pub use die::*;
mod store;
pub use store::*;
mod names;
pub use names::*;
mod ty;
pub use ty::*;
mod sym;
pub use sym::*;
mod registers;
pub use registers::*;
mod abi;
pub use abi::*;
mod emit;
pub use emit::*;
