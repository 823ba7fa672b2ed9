//! HTTP API of the authorization-data service: routing, request/response
//! mapping, bearer-token checks and process configuration.

pub mod app;
pub mod config;
pub mod middleware;
