//! # Dify RAG MCP
//!
//! A protocol server that exposes a remote knowledge-base (RAG) service
//! (datasets, documents, segments and several retrieval modes) as a
//! uniform set of tools and resources, reachable over stdio, an HTTP event
//! stream or a WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌────────────────┐   ┌────────────┐   ┌──────────────────┐
//! │  Transport    │──▶│ ProtocolServer │──▶│ Dispatcher │──▶│ ApiClient        │──▶ upstream
//! │ stdio/sse/ws  │◀──│ lifecycle+drain│◀──│ tools/res. │   │ retry + timeout  │
//! └───────────────┘   └────────────────┘   └─────┬──────┘   └──────────────────┘
//!                                                │                  ▲
//!                                                ▼                  │
//!                                         ┌────────────────┐        │
//!                                         │SearchAggregator│────────┘
//!                                         │hybrid / multi  │
//!                                         └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export DIFY_API_KEY=dataset-...
//! dify-rag-mcp health                       # probe the upstream
//! dify-rag-mcp serve                        # stdio
//! dify-rag-mcp serve --transport sse --port 8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration + environment overrides |
//! | [`error`] | Error taxonomy returned to clients |
//! | [`models`] | Dataset / document / segment / search result types |
//! | [`retry`] | Backoff policy |
//! | [`client`] | Upstream API client and operation catalog |
//! | [`search`] | Hybrid and multi-dataset search aggregation |
//! | [`params`] | Schema-driven parameter validation |
//! | [`tools`] | Tool trait, built-in tools, registry |
//! | [`resources`] | Resource URIs and their resolution |
//! | [`protocol`] | Request / response envelopes |
//! | [`dispatch`] | Method routing |
//! | [`server`] | Lifecycle state machine |
//! | [`transport`] | stdio, event-stream and WebSocket adapters |
//! | [`mcp`] | MCP streamable-HTTP bridge |

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mcp;
pub mod models;
pub mod params;
pub mod protocol;
pub mod resources;
pub mod retry;
pub mod search;
pub mod server;
pub mod tools;
pub mod transport;
