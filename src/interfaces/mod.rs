pub mod cache;
pub mod store;

pub use cache::Cache;
pub use store::Store;
