//! Core domain + application logic for the time-entry exporter.
//!
//! This crate is framework-agnostic. The tracker and Telegram live behind
//! ports (traits) implemented in adapter crates.

pub mod config;
pub mod digest;
pub mod domain;
pub mod errors;
pub mod export;
pub mod flow;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod scheduler;
pub mod security;
pub mod session;
pub mod workdate;

pub use errors::{Error, Result};
