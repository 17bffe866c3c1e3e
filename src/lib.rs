//! Purpose: Delimited-text indexing library behind `delimdex-bench` and embedding callers.
//! Exports: `api` (stable entry points and result types), `core` (scanner, sources, sharding).
//! Role: Locates field and row boundaries; value parsing is left to consumers.
//! Invariants: `api` is the supported surface; `core` is public for benches and tests.
//! Invariants: Core modules take explicit inputs and keep no global state.
pub mod api;
pub mod bench;
pub mod core;
