pub mod api;
pub mod app;
pub mod config;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod humanize;
pub mod messaging;
pub mod observability;
pub mod service;
pub mod storage;
pub mod store;
pub mod task;

#[cfg(test)]
mod test_support;
