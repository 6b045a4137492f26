//! hirawatch - change detection and structured reading for HIRA anticancer
//! regimen publications.
//!
//! Tracks the documents HIRA publishes about approved off-label anticancer
//! regimens, keeps a content-addressed history of every version seen, and
//! decodes the published spreadsheet and PDF on demand.

#![allow(clippy::should_implement_trait)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod decode;
pub mod fetch;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod ops;
pub mod resolver;
pub mod schedule;
pub mod scrapers;
pub mod storage;
pub mod store;
