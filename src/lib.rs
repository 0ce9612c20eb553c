pub mod api;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod state;
pub mod store;
