//! HTTP request handlers
//!
//! This module contains the request handlers for the firewall endpoints.

pub mod assertion;
pub mod health;
pub mod secure;

pub use crate::state::FirewallState;
pub use assertion::begin_assertion;
pub use health::{health, HealthResponse};
pub use secure::{proxy_handler, secure_handler};
