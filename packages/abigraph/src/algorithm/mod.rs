mod dedupe;
pub use dedupe::*;
mod prune;
pub use prune::*;
mod audit;
pub use audit::*;
