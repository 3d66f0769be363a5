pub mod chat;
pub mod common;
pub mod completions;
pub mod config;
pub mod device;
pub mod message;
pub mod sync;
