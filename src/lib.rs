//! Parley: multi-tenant conversational-AI engine.
//!
//! Inbound chat messages are matched against a tenant-configured catalog of
//! intentions via LLM tool calling, missing arguments are collected across
//! turns, matched intentions execute as templated webhook chains or local
//! handlers, and the outcome becomes a natural-language reply.

pub mod auth;
pub mod catalog;
pub mod compose;
pub mod config;
pub mod engine;
pub mod http;
pub mod intent;
pub mod llm;
pub mod schedule;
pub mod speech;
pub mod state;
pub mod template;
pub mod timezone;
pub mod types;
