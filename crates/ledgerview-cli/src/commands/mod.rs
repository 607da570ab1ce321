//! CLI command implementations.

pub mod canvas;
pub mod chat;
pub mod stake;
