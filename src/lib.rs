//! Sentinel uploader - forwards chat log intel reports to a Sentinel server.

pub mod api;
pub mod app;
pub mod config;
pub mod logs;
pub mod realtime;
pub mod status;
