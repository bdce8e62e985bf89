pub mod backend;
pub mod client;
pub mod db;
pub mod env_config;
pub mod error;
pub mod queue;
pub mod search;
pub mod serialization;
pub mod store;
pub mod subscription;
pub mod types;

pub use client::{ClientConfig, SendOutcome, T2ChatClient};
pub use error::ChatError;
