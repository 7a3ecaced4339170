pub mod applications;
pub mod client;
pub mod clock;
pub mod codec;
pub mod companies;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod store;
