pub mod agent;
pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod models;
pub mod routes;
pub mod service;
