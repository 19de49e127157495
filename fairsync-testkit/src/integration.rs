//! Integration tests for full sync workflows.
//!
//! These tests drive upload, store, push and pull against the in-memory
//! backend and check both sides afterwards.
