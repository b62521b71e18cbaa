pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod football;
pub mod monitoring;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod service;
pub mod sync;
