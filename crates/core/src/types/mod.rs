//! Core types for the salon client.
//!
//! This module provides type-safe wrappers for the backend's domain concepts.

pub mod credential;
pub mod email;
pub mod id;
pub mod shop;
pub mod user;

pub use credential::CredentialBundle;
pub use email::{Email, EmailError};
pub use id::*;
pub use shop::Shop;
pub use user::User;
