//! Command handlers

pub mod config;
pub mod connect;
pub mod serve;
pub mod token;
