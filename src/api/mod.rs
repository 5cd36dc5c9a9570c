//! HTTP server implementation
//!
//! Routes, middleware and handlers for the proxy gateway surface.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{AppState, Server};
