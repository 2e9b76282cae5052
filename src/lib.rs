// src/lib.rs

//! Harvest cache library
//!
//! Disk-backed cache of scraped pages with an in-process opportunity index
//! and a job-title search layer on top.

pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod search;
pub mod storage;
pub mod utils;
