//! Test harness utilities for load-harness integration testing.
//!
//! Provides a TCP-served [`LoadHarness`](rsload::LoadHarness) and a raw STOMP
//! client.

#![allow(dead_code)]

mod client;
mod server;

pub use client::TestClient;
pub use server::TestServer;
