#![allow(clippy::cargo_common_metadata)]

pub mod artwork;
pub mod config;
pub mod error;
pub mod event;
pub mod format;
pub mod signal;
pub mod spec;
pub mod state;
pub mod tags;
pub mod tolerance;

#[cfg(feature = "test-utils")]
pub mod test_utils;
