//! Stagepass - Route protection and session management for an event
//! ticketing frontend
//!
//! This library provides the token validator, route classifier, session
//! store and access guard, plus the edge server that applies the route
//! decisions in front of the built site.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod services;
