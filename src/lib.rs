pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod geo;
pub mod normalizer;
pub mod refresh;
pub mod summarize;
pub mod types;
