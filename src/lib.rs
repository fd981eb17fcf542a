pub mod cloudflare;
pub mod commands;
pub mod compose;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod http;
pub mod manifests;
pub mod naming;
pub mod providers;
pub mod ssh;
pub mod steps;
pub mod telemetry;
pub mod waiter;
