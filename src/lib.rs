pub mod classes;
pub mod config;
pub mod error;
pub mod provision;
pub mod remote;
pub mod security;
pub mod server;
pub mod store;
