pub mod config;
pub mod manifest;
pub mod notify;
pub mod provider;
pub mod registry;
pub mod scan;
pub mod store;
pub mod transport;
