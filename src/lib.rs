//! Gatekeeper - Distributed Admission Control
//!
//! This crate limits how many times a protected operation may run across any
//! number of cooperating processes within a fixed time window. A shared
//! atomic counter store (Redis in production) is the single source of truth
//! for the count; each process only increments and lets the store expire
//! windows.

pub mod config;
pub mod error;
pub mod intercept;
pub mod ratelimit;
pub mod store;
