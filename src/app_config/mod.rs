pub mod db;
pub mod env;
pub mod log;
pub mod shutdown_manager;
pub mod trader_config;
