//! Client library for the gift-recipient API.
//!
//! The interesting part lives in [`transport::pipeline`]: every outbound call
//! carries the session's bearer token, and a 401 triggers a single
//! coordinated token refresh shared by all concurrently failing requests,
//! after which each of them is replayed exactly once.

pub mod config;

pub mod error;

pub mod storage;

pub mod session;

pub mod transport;

pub mod application;

pub mod utils;
