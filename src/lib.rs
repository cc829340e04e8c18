//! # Slot Swap
//!
//! A marketplace service where users publish calendar slots, offer some of
//! them for exchange and negotiate one-for-one swaps with other users.
//!
//! ## Overview
//!
//! Users register and log in to obtain a bearer token. Each slot is owned by
//! exactly one user. A swappable slot shows up in every other user's
//! marketplace; offering one of your own swappable slots for it creates a
//! pending swap request that locks both slots until the recipient accepts
//! (owners are exchanged) or rejects (both slots go back on offer).
//!
//! ## Example
//!
//! ```no_run
//! use slot_swap::{api, AppState, Config, CredentialService, Database};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!
//!     let db = Database::new(&config.database_url).await?;
//!     db.migrate().await?;
//!
//!     let credentials = CredentialService::new(
//!         db.clone(),
//!         &config.jwt_secret,
//!         config.token_ttl_seconds,
//!         config.bcrypt_cost,
//!     );
//!     let addr = config.server_address();
//!     let app = api::create_router(AppState::new(db, credentials), config.cors_origins);
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod swap;
pub mod types;

#[cfg(test)]
mod db_tests;

pub use api::AppState;
pub use auth::{AuthUser, CredentialService};
pub use config::Config;
pub use db::Database;
pub use error::{Result, SwapError};
pub use swap::SwapEngine;
pub use types::{NewSlot, RequestStatus, Slot, SlotStatus, SlotUpdate, SwapFilter, SwapRequest, User};
