#![cfg_attr(test, allow(clippy::expect_used))]

//! Quillbox Shared Types and Utilities
//!
//! This crate contains types and utilities shared across the Quillbox platform.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
