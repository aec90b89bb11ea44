//! # Legal RAG
//!
//! Question answering over uploaded legal PDFs. Answers are generated only
//! from retrieved passages and carry page-level citations and a confidence
//! label.
//!
//! The crate contains both halves of the system: an axum backend that
//! ingests documents and answers questions, and a terminal client that
//! talks to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  HTTP   ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │  Client  │────────▶│  Server  │──▶│ Extract+Chunk│──▶│  SQLite  │
//! │ (legal)  │◀────────│  (axum)  │   │   +Embed     │   │ chunks + │
//! └──────────┘         └────┬─────┘   └──────────────┘   │ vectors  │
//!                           │                            └────┬─────┘
//!                           ▼                                 │
//!                      ┌──────────┐   retrieve top-k          │
//!                      │   LLM    │◀──────────────────────────┘
//!                      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! legal init                        # create database
//! legal serve                       # start the API
//! legal login                       # obtain a session token
//! legal docs upload ./contract.pdf  # ingest a PDF
//! legal ask "What is the termination clause?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Wire and domain types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`extract`] | PDF page text extraction |
//! | [`chunk`] | Sentence-aware chunking and section detection |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Document, chunk, and vector persistence; similarity search |
//! | [`llm`] | Grounded answer generation and confidence parsing |
//! | [`usage`] | Daily usage tracking and limits |
//! | [`ingest`] | Upload pipeline |
//! | [`query`] | Question answering pipeline |
//! | [`auth`] | API key checks and server-side sessions |
//! | [`server`] | HTTP API |
//! | [`client`] | Typed API client |
//! | [`session`] | Client authentication state |
//! | [`cache`] | Client response cache |
//! | [`chat`] | Chat transcript and question validation |
//! | [`render`] | Terminal rendering |
//! | [`status`] | Usage bar polling |
//! | [`app`] | Client application context |

pub mod app;
pub mod auth;
pub mod cache;
pub mod chat;
pub mod chunk;
pub mod client;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod query;
pub mod render;
pub mod server;
pub mod session;
pub mod status;
pub mod store;
pub mod usage;
