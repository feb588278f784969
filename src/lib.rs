pub mod archive;
pub mod chown;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod export;
pub mod file_sources;
pub mod import;
pub mod model_store;
pub mod session;
