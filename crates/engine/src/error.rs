// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine.

use thiserror::Error;

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] taskd_storage::StoreError),
    #[error("gate error: {0}")]
    Gate(#[from] taskd_gate::GateError),
    #[error("agent error: {0}")]
    Agent(#[from] taskd_adapters::AgentError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
