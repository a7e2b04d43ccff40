//! Download stages: release archives over HTTP, repositories over Git.

pub mod git;
pub mod http;
