pub mod config;
pub mod database;
pub mod forecast;
pub mod routes;
pub mod scheduler;
pub mod utils;
