//! End to end tests for the book exchange service.
//!
//! These expect a running instance (see the workspace README) and are
//! gated behind features so plain `cargo test` stays self-contained:
//! `cargo test --features system_tests` / `--features load_tests`.
