//! Activity logging: a JSONL append-only log written by a dedicated thread,
//! with an optional human-readable stderr echo.

pub mod activity;
pub mod jsonl;
