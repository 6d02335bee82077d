//! Entry point for the gold price service crate.
//! Consumers should import exported types via the crate root.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dhab::{build_router, AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dhab::PriceError> {
//!     let state = Arc::new(AppState::new(Config::from_env())?);
//!     let app = build_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080")
//!         .await
//!         .map_err(|err| dhab::PriceError::Network(err.to_string()))?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await
//!     .map_err(|err| dhab::PriceError::Network(err.to_string()))?;
//!     Ok(())
//! }
//! ```

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
