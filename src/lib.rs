//! Livemock is a mock HTTP service.
//!
//! Endpoint definitions (method, path pattern, body template) are kept in a
//! store and compiled into a routing table that is swapped atomically on
//! every change. A definition's body decides how it responds: a rendered
//! JSON template, a Mockbin-style response, a conditional `_dynamic` rule
//! set, a request echo, a stored file, or a load-balanced reverse proxy
//! with optional tee mirroring.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate, health).
//! - [`expr`] -- Boolean/arithmetic expression evaluator used by `_dynamic` rules.
//! - [`template`] -- `@`-directive template engine for response bodies.
//! - [`endpoint`] -- Definitions, validation, and the endpoint compiler.
//! - [`routing`] -- Route trie, snapshot synchronization, dispatch, and the
//!   built-in diagnostic routes.
//! - [`proxy`] -- Backend pools with health checks, forwarding, and tee mirroring.
//! - [`store`] -- [`EndpointStore`](store::EndpointStore) backends (memory,
//!   JSON file, SQLite).
//! - [`service`] -- Administrative create/update/delete with resynchronization.
//! - [`admin`] -- The `/livemock/api` HTTP surface over [`service`].
//! - [`broadcast`] -- Rate-limited stream of served-request summaries.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`health`] -- `GET /livemock/health` handler returning runtime diagnostics.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`server`] -- Axum server setup, shared application state, HTTP client, and
//!   graceful shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `sqlite` | SQLite endpoint store and `@db-*` directives _(enabled by default)_ |
//! | `postgres` | PostgreSQL for `@db-*` directives |
//! | `redis` | `@redis-*` directives |
//! | `db-backends` | All database backends |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod admin;
pub mod broadcast;
pub mod cli;
pub mod cmd;
pub mod endpoint;
pub mod error;
pub mod expr;
pub mod health;
pub mod json;
pub mod logging;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod service;
pub mod store;
pub mod template;
