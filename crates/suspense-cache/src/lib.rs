//! A cache of asynchronously produced resources that can be read synchronously.
//!
//! See the [`caching`] module for the cache itself, and [`suspense`] for the retry loop readers
//! use to wait for pending resources.

#[macro_use]
pub mod metrics;

pub mod auth;
pub mod caching;
pub mod config;
pub mod logging;
pub mod suspense;
pub mod users;
pub mod utils;
