//! Integration tests for the ingestion pipeline
//!
//! These tests use wiremock to create mock HTTP sources and exercise the
//! fetch engine and the full worker pipeline end-to-end against an on-disk
//! SQLite database.

mod common;
mod pagination_tests;
mod pipeline_tests;
