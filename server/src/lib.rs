pub mod clock;
pub mod config;
pub mod events;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
