//! Vector search engine benchmark library
//!
//! Generates labeled embedding corpora, drives a black-box engine process
//! through its add/search protocol, and measures latency and cross-method
//! result quality.

pub mod benchmark;
pub mod config;
pub mod corpus;
pub mod embedders;
pub mod engine;
pub mod error;

pub use error::{DataError, HarnessError, InvocationError};
