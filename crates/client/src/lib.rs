//! Salon client library.
//!
//! The client-side session and context core for the salon booking backend:
//!
//! - [`session`] - login, restore and logout state machine
//! - [`gateway`] - the single outbound HTTP path; attaches credentials,
//!   classifies responses and raises auth-failure / context-required signals
//! - [`context`] - stale-aware cache of the selected shop
//! - [`events`] - in-process publish/subscribe between the pieces above
//! - [`token_store`] / [`storage`] - durable credentials and cached context
//!
//! [`SalonClient`] wires everything together. Create one at startup and hand
//! clones to whatever needs it.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod gateway;
pub mod session;
pub mod storage;
pub mod token_store;

#[cfg(test)]
mod testutil;

pub use client::SalonClient;
pub use config::{ClientConfig, ConfigError, ContextCacheConfig};
pub use context::shop::SelectedShop;
pub use context::{ContextCache, ContextSnapshot, Freshness, GetOptions};
pub use error::{Error, Result};
pub use events::{ClearReason, Event, EventChannel, SubscriptionToken, Topic};
pub use gateway::{GatewayError, HttpGateway, RequestOptions};
pub use session::{SessionError, SessionManager, SessionState};
