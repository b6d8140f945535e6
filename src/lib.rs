//! Publish a local file tree into a remote repository in bounded, prioritized
//! batches, then verify that the remote state matches what was committed.
//!
//! Pipeline: [`analyze`] → [`plan`] → [`engine`] (over a [`transport`]) →
//! [`verify`], wired together by [`publish::publish`].

pub mod analyze;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod load_config;
pub mod model;
pub mod plan;
pub mod publish;
pub mod source;
pub mod transport;
pub mod verify;

pub use cli::{run, Cli, Commands};
