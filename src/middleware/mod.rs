//! Middleware applied to the API routers.
pub mod auth;
