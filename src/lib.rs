#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod ranking;
pub mod resolver;
pub mod security;
pub mod youtube;
