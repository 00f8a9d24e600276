//! Salon Core - Shared domain types.
//!
//! This crate provides the types exchanged between the salon booking backend
//! and the client-side session core:
//! - `client` - Session, credential and selected-shop management library
//! - `cli` - Command-line host driving the client against a live backend
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, users, shops and credential bundles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
