//! Starboard reconciliation: mirrors sufficiently-starred messages into
//! starboard channels and keeps those mirrors in step with live reactions.

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod db;
pub mod discord;
pub mod emoji;
pub mod engine;
pub mod guilds;
pub mod intake;
pub mod mirror;
pub mod model;
pub mod platform;
