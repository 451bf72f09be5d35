pub mod chat;
pub mod models;
pub mod route;
pub mod version;
