// src/agent/mod.rs

//! The agent runtime, orchestrating all lifecycle stages.

use crate::config::Config;
use crate::core::errors::AgentError;
use crate::core::phases::BringUp;

pub mod initialization;
pub mod metrics_server;
pub mod supervisor;

pub use initialization::AgentContext;

/// The main agent entry point: initialize, run bring-up, then supervise
/// until a termination signal completes the shutdown sequence.
pub async fn run(config: Config) -> Result<(), AgentError> {
    // 1. Build the shared-state store and verify fatal preconditions.
    let ctx = initialization::setup(config)?;

    // 2. Execute the bring-up state machine (phases A-G).
    let bring_up = BringUp::new(ctx.config.clone(), ctx.state.clone(), ctx.orchestrator.clone());
    let outcome = bring_up.run().await?;

    // 3. Spawn the workers and enter the supervision loop until shutdown.
    supervisor::run(ctx, outcome).await
}
