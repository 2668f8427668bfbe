//! Database backends implementing the traits in [`crate::graph`].
//!
//! | Backend | Module |
//! |---------|--------|
//! | PostgreSQL + Apache AGE (+ pgvector) | [`postgres`] |
//!
//! A backend provides a client implementing `CypherExecutor`, `SqlExecutor`
//! and `GraphClient`, and a transaction type implementing `CypherExecutor`,
//! `SqlExecutor` and `Transaction`.

pub mod postgres;
