pub mod app;
pub mod client;
pub mod config;
pub mod domain;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod flatten;
pub mod fs_util;
pub mod output;
pub mod transport;
