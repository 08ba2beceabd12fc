//! TurboStream: a real-time stream fan-out and AI-analysis broker.
//!
//! This root package carries no code of its own — it exists so the
//! workspace's cross-crate end-to-end scenarios (`tests/integration/`) have
//! somewhere to live, the way the teacher's root `rusty-timer` package hosts
//! its own `tests/integration/*.rs` suite. The actual components (C1–C7)
//! live in `crates/ts-*`; the runnable broker is `services/broker`; the
//! terminal dashboard is `apps/tui`.
