pub mod utils;
pub mod types;
pub mod price_infra;
pub mod storage;
pub mod service;
pub mod error;
pub mod config;
pub mod observability;
pub mod interfaces;
pub mod api;

pub use error::{Error, Result};
