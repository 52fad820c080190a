// Compile commands
mod compile;
mod compile_check;

pub use compile::*;
pub use compile_check::*;

// Documentation commands
mod doc_check;

pub use doc_check::*;
pub use doc_test::*;

// Lint commands
mod clippy;
mod format;

pub use clippy::*;
pub use format::*;

// Test commands
mod loom;
mod miri;
mod test;

pub use loom::*;
pub use miri::*;
pub use test::*;
