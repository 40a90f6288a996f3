pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod utils;

pub use catalog::Catalog;
pub use config::Opts;
pub use error::{CatalogError, Result, StoreError};
