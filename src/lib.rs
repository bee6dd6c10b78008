pub mod audit;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod polling;
pub mod runtime;
pub mod sired;
pub mod token;
