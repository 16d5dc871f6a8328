//! Shared source-position and diagnostic plumbing threaded through every
//! stage of the pipeline (lexer, parser, IR generator, VM).

pub mod diagnostic;
pub mod file;
pub mod pos;

pub use diagnostic::{Diagnostic, Diagnostics};
pub use file::File;
pub use pos::Pos;
