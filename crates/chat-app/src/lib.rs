#![deny(unsafe_code)]

pub mod app;
pub mod chat;
pub mod markdown;
pub mod settings;
pub mod terminal;
