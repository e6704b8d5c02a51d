//! Subcommand implementations. Each returns the process exit code.

pub mod init;
pub mod post;
pub mod pre;
pub mod status;
