//! Import Service - reconciles parsed card and bank statements into a purchase ledger.

pub mod config;
pub mod engine;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
