//! Integration tests for the job service, run against the in-memory store
//! and queue gateway.
//!
//! PostgreSQL-backed store tests live beside the store itself and are
//! ignored unless `DATABASE_URL` is provided.

mod common;
mod integration;
