pub mod api;
pub mod cache;
pub mod config;
pub mod cors;
pub mod error;
pub mod extract;
pub mod gtfs_feed;
pub mod live_models;
pub mod origin;
pub mod reference;
pub mod state;
