pub mod aggregate;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod executor;
pub mod exit;
pub mod inspect;
pub mod journal;
pub mod platform;
pub mod quality;
pub mod registry;
pub mod remote;
pub mod scenarios;
pub mod sink;
pub mod ui;
pub mod workers;
