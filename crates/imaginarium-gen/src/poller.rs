//! The polling loop driving a submitted job to its terminal state
//!
//! Polls the status service at a fixed interval until the job completes or
//! cancellation is requested. The loop suspends during the wait and during
//! each round trip; it never holds a thread. Cancellation is cooperative:
//! checked at the top of each iteration and again right after the wait, so
//! a cancel requested mid-wait prevents the next query entirely.

use imaginarium_core::Result;
use std::time::Duration;

use crate::api::StatusService;
use crate::job::{JobContext, Stage};

/// Default wait between status queries
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A completed job's result payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagineResult {
    pub texture_url: String,
    pub prompt: String,
}

/// Poll until the job completes or is cancelled.
///
/// Returns `Ok(Some(result))` on completion and `Ok(None)` when cancelled;
/// the caller owns the idle-state cleanup for the cancelled case. A status
/// query error propagates and ends the run; an empty payload means "still
/// running" and the loop continues. There is no iteration cap: a job that
/// never completes polls until cancelled.
pub async fn poll_until_complete(
    status: &dyn StatusService,
    ctx: &JobContext,
    api_key: &str,
    interval: Duration,
) -> Result<Option<ImagineResult>> {
    let job_id = ctx.job_id();
    let mut polls = 0u64;

    while !ctx.is_cancelled() {
        tokio::time::sleep(interval).await;

        if ctx.is_cancelled() {
            break;
        }

        polls += 1;
        let payload = status.get_imagine(&job_id, api_key).await?;

        if !payload.is_empty() {
            ctx.set_stage(Stage::ResultReady);
            let result = ImagineResult {
                texture_url: payload.get("textureUrl").cloned().unwrap_or_default(),
                prompt: payload.get("prompt").cloned().unwrap_or_default(),
            };
            tracing::info!(job_id = %job_id, polls, "Job complete");
            return Ok(Some(result));
        }

        tracing::debug!(job_id = %job_id, polls, "Job still running");
    }

    tracing::info!(job_id = %job_id, polls, "Polling cancelled");
    Ok(None)
}
