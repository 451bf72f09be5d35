pub mod config;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod providers;
pub mod retry;
pub mod router;
pub mod sandbox;
pub mod transcoder;
