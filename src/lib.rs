pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod paths;
pub mod sources;
pub mod transfer;
