//! Services layer - Remote collaborators
//!
//! This module contains the clients for services the frontend depends on:
//! - The backend API (accounts, tokens, roles, invitations)
//! - The remote log endpoint

pub mod api_client;
pub mod remote_log;

pub use api_client::{ApiClientError, AuthApi, HttpAuthApi, LoginChallenge};
pub use remote_log::{LogLevel, LogRecord, RemoteLogger};
