mod scan;
pub use scan::*;
mod lines;
pub use lines::*;
mod loc;
pub use loc::*;
mod symtab;
pub use symtab::*;
mod vtable;
pub use vtable::*;

pub mod resolve;
