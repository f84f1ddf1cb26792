pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod moderation;
pub mod routes;
pub mod services;
pub mod state;
pub mod websocket;
