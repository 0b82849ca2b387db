//! Shared helpers for the StashDB benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
