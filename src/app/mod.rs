pub mod config;
pub mod factory;
pub mod manager;
pub mod memory_app_manager;
