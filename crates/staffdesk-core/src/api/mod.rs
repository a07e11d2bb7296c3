//! REST client module for the employee-management backend.
//!
//! `ApiClient` is issued by `SessionManager` and is the only sanctioned way for
//! pages to reach the backend. It attaches the current bearer token and turns
//! 401/403 responses into a forced logout.

pub mod client;
pub mod error;

pub use client::{bearer_header, classify_status, ApiClient, ApiResponse, Disposition};
pub use error::ApiError;
