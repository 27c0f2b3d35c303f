// storefront/src/services/mod.rs

pub mod customers;
pub mod gateway;
pub mod installments;
pub mod subscriptions;
