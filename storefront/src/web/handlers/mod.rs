// storefront/src/web/handlers/mod.rs

pub mod emi_handlers;
pub mod health_handlers;
pub mod order_handlers;
pub mod payment_handlers;
pub mod payment_method_handlers;
pub mod subscription_handlers;
pub mod webhook_handlers;
