//! Ginger Assistant Service
//!
//! Environment configuration, agent catalog loading and speech output for
//! the interactive assistant. The `assistant` binary is a thin loop around
//! this library and `ginger_core::CommandProcessor`.

pub mod catalog;
pub mod config;
pub mod speech;
