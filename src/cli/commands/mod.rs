//! CLI command implementations.

pub mod init;
pub mod jobs;
pub mod locks;
pub mod record;
pub mod run;
pub mod scan;
pub mod tick;
