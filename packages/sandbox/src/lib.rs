// ABOUTME: Disposable-container command execution for burnbox
// ABOUTME: Builds a one-off image from caller files and runs a command in it under a sandbox runtime

mod container;
mod context;
pub mod error;
pub mod executor;
pub mod fileset;
pub mod network;
pub mod output;

// Re-export commonly used types
pub use error::{Result, SandboxError};
pub use executor::{Executor, ExitStatus};
pub use fileset::{DirFileSet, File, FileSet, MemoryFileSet};
pub use network::{NetworkMode, SeccompProfile};
pub use output::SharedWriter;
