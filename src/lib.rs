//! signalgraph - hybrid context retrieval over security telemetry
//!
//! Normalizes heterogeneous security records into a typed entity graph with
//! embeddings, then answers investigation questions by seeding from vector
//! similarity and expanding along graph relationships.

pub mod answer;
pub mod cli;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod inference;
pub mod migrations;
pub mod models;
pub mod normalizer;
pub mod resolver;
pub mod retry;
pub mod services;
pub mod sources;
pub mod vector;
