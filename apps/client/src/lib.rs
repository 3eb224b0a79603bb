pub mod api_client;
pub mod config;
pub mod errors;
pub mod guards;
pub mod models;
pub mod navigation;
pub mod notifications;
pub mod realtime;
pub mod services;
pub mod session;
pub mod storage;
