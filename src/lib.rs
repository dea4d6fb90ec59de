//! Stable-identifier visual assets for markdown documents.
//!
//! Documents declare assets in fenced `visual` blocks. [`catalog`] records
//! every occurrence under a stable key, [`state`] tracks what is known about
//! generating each one across incremental and parallel rebuilds, and
//! [`machine`] drives the [`backend`]s that produce content.

pub mod backend;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hasher;
pub mod machine;
pub mod project;
pub mod scanner;
pub mod snapshot;
pub mod state;
pub mod types;
pub mod watch;
