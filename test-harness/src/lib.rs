// Churn harness: drives the churn engine against a NATS JetStream deployment.
pub mod app;
pub mod config;
pub mod gate;
pub mod nats;
pub mod observability;
