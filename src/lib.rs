//! # Ethereum Data API
//!
//! An HTTP service that answers `GET /api/ethereum/{address}` with the
//! node's current gas price, latest block number and the address balance,
//! fetched concurrently under one deadline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Recovery → Logger → ... → RateLimit → Auth)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, ethereum, debug)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Aggregator (3-way fan-out, first failure wins)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UpstreamClient (alloy JSON-RPC provider | static stub)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ethereum_data_api::upstream::RpcUpstream;
//! use ethereum_data_api::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let upstream = Arc::new(RpcUpstream::connect(&config.ethereum_rpc_url)?);
//!
//!     let state = AppState::new(config, upstream);
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! ```bash
//! AUTH_ENABLED=true API_KEYS=key1:alice,key2:bob cargo run
//! RATE_LIMIT=100 RATE_LIMIT_WINDOW_SECS=900 cargo run
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod upstream;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use context::RequestContext;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use services::Aggregator;
pub use state::AppState;
pub use upstream::UpstreamClient;
