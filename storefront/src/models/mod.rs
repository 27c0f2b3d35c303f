// storefront/src/models/mod.rs

//! Ledger entities as stored in Postgres.

pub mod customer;
pub mod emi_plan;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod subscription;

pub use customer::BillingCustomer;
pub use emi_plan::EmiPlan;
pub use order::{Order, OrderStatus, OrderWithItems};
pub use order_item::OrderItem;
pub use payment::{Payment, PaymentStatus, UnmatchedPaymentEvent};
pub use subscription::{local_observation_time, BillingPeriod, Subscription, SubscriptionStatus};
