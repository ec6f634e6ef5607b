//! aerobase - an object API server with per-request authorization
//!
//! Objects live in named classes and are reached through the REST
//! orchestrator in [`rest`], which resolves credentials, checks class and
//! object permissions, runs hooks and keeps sessions in sync.

pub mod acl;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod http;
pub mod locks;
pub mod query;
pub mod rest;
pub mod schema;
pub mod store;
pub mod triggers;
pub mod value;
