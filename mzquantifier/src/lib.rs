mod args;
mod driver;
mod progress;
mod table;
mod write;

pub use args::*;
pub use driver::{Command, MZQuantifier, MZQuantifierError};
pub use progress::ProgressRecord;
pub use table::{QuantifyLayout, TableError};
