//! API handlers.
//!
//! `auth` owns credentials, sessions and tokens; the remaining modules are small
//! resources served behind the auth middleware, plus the health check.

pub mod auth;
pub mod health;
pub mod me;
pub mod users;
