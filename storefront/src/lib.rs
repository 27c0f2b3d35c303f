// storefront/src/lib.rs

//! Payment and order ledger for a storefront: checkout recording,
//! subscriptions, EMI installment plans and processor webhook reconciliation.

pub mod config;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod pipelines;
pub mod services;
pub mod state;
pub mod web;
