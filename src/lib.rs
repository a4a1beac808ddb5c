pub mod app;
pub mod chart;
pub mod config;
pub mod group;
pub mod logging;
pub mod models;
pub mod realtime;
pub mod store;
