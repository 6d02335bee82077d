pub mod config;
pub mod dto;
pub mod forecast;
pub(crate) mod helpers;
pub mod handler;
pub mod ingest;
pub mod store;
pub mod implementation {
    include!("impl.rs");
}

pub use config::Config;
pub use dto::*;
pub use handler::{build_router, AppState};
pub use helpers::{calculate_price_change, PriceChange};
pub use implementation::GoldPriceSource;
pub use store::PriceStore;
