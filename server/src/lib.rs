pub mod api;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod http_server;
pub mod leaderboard_cache;
pub mod leaderboard_server;
pub mod pubsub_manager;
pub mod refresher;
pub mod subscription_registry;
pub mod transport;
pub mod update_processor;
pub mod ws_server;
