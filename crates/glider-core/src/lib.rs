//! Core domain + application logic for ArchiveGlider.
//!
//! This crate is intentionally framework-agnostic. Telegram and yt-dlp live
//! behind ports (traits) implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod domain;
pub mod download;
pub mod errors;
pub mod failure;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod offload;
pub mod security;
pub mod status;

pub use errors::{Error, Result};
