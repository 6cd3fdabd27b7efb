pub mod cache;
pub mod cookies;
pub mod error;
pub mod platform;
pub mod publisher;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod twitter;
