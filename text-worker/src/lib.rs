pub mod annotate;
pub mod config;
pub mod error;
pub mod processor;
