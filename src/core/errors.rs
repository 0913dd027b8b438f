// src/core/errors.rs

//! Defines the primary error types for the agent.

use crate::core::state::Phase;
use thiserror::Error;

/// A bring-up phase failure. Each phase carries a dedicated process exit code
/// so an operator can tell from the service status where bring-up stopped.
#[derive(Error, Debug)]
#[error("phase {} failed: {}", .phase.as_str(), .message)]
pub struct PhaseError {
    pub phase: Phase,
    pub message: String,
}

impl PhaseError {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.phase {
            Phase::A => 3,
            Phase::B => 4,
            Phase::C => 5,
            Phase::D => 6,
            Phase::E => 7,
            _ => 1,
        }
    }
}

/// The top-level agent error: a phase failure with its own exit code, or a
/// fatal fault (metrics bind, signal registration) that exits 1.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("Fatal: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl AgentError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Phase(e) => e.exit_code(),
            AgentError::Fatal(_) => 1,
        }
    }
}
