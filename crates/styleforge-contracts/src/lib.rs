pub mod api;
pub mod config;
pub mod events;
pub mod images;
pub mod models;
pub mod project;
