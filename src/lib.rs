pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notifications;
pub mod portal;
pub mod routes;
pub mod source;
