//! Shared utilities for audio-scribe: XDG paths and the daemon client.

pub mod client;
pub mod dirs;
