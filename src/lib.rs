#![forbid(unsafe_code)]

pub mod config;
pub mod metrics;
pub mod service;
pub mod state;
pub mod vfs;
