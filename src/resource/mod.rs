//! Built-in resource types for the converge CLI
//!
//! Every type implements [`catalog::Resource`]:
//! - `notify` - records a message as a change
//! - `file` - files, directories and recursive copies
//! - `exec` - shell commands, optionally only on refresh
//! - `class` - a container for grouping other resources

pub mod class;
pub mod exec;
pub mod file;
pub mod notify;

pub use class::Class;
pub use exec::{Exec, ShellBackend};
pub use file::{Ensure, File, FileBackend};
pub use notify::Notify;
