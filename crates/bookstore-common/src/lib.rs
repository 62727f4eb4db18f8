//! Common utilities for the bookstore query runner
//!
//! This crate provides the error type shared by the store layer and the CLI.

pub mod error;

pub use error::{BookstoreError, Result};
