pub mod market;

pub use market::MarketService;
