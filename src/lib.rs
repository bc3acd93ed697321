pub mod app;
pub mod cache_key;
pub mod config;
pub mod domain;
pub mod earth_engine;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod processing;
pub mod ranges;
pub mod raster;
pub mod server;
pub mod store;
