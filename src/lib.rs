//! Tablebook - restaurant table booking service
//!
//! The request path: admission gate, session verification, then the booking
//! ledger, which fans `new-booking` events out to restaurant dashboards.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod store;
