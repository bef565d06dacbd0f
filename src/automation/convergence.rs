//! Return-to-reference loop.
//!
//! Each attempt captures once and compares against the reference screen. A
//! miss presses BACK and tries again; a failed capture simply uses up the
//! attempt. The loop always ends in `Converged` or `GivenUp`.
use serde::{Deserialize, Serialize};

use crate::automation::audit::AuditEvent;
use crate::automation::session::Session;
use crate::device::transport::DeviceKey;
use crate::perception::similarity::ReferenceState;
use crate::perception::types::Frame;

const PHASE: &str = "convergence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    Capturing,
    Comparing,
    Recovering,
    Converged,
    GivenUp,
}

impl ConvergenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceState::Capturing => "capturing",
            ConvergenceState::Comparing => "comparing",
            ConvergenceState::Recovering => "recovering",
            ConvergenceState::Converged => "converged",
            ConvergenceState::GivenUp => "given_up",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub similarity_threshold: f64,
    pub max_attempts: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceOutcome {
    Converged { attempts: u32, similarity: f64 },
    GivenUp { attempts: u32, best_similarity: Option<f64> },
}

impl ConvergenceOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceOutcome::Converged { .. })
    }
}

/// Drives the device back to `reference`, pressing BACK between attempts.
pub async fn converge(
    session: &mut Session,
    reference: &ReferenceState,
    config: &ConvergenceConfig,
) -> ConvergenceOutcome {
    let mut state = ConvergenceState::Capturing;
    let mut attempt: u32 = 0;
    let mut frame: Option<Frame> = None;
    let mut similarity = 0.0;
    let mut best: Option<f64> = None;

    loop {
        let next = match state {
            ConvergenceState::Capturing if attempt >= config.max_attempts => ConvergenceState::GivenUp,
            ConvergenceState::Capturing => {
                attempt += 1;
                frame = session.capture_once(PHASE).await.into_frame();
                if frame.is_some() {
                    ConvergenceState::Comparing
                } else {
                    tracing::warn!(attempt, max = config.max_attempts, "convergence capture failed");
                    let backoff = session.capture_policy().backoff;
                    session.settle(backoff).await;
                    ConvergenceState::Capturing
                }
            }
            ConvergenceState::Comparing => {
                // Only reachable with a frame from the capture above.
                similarity = frame.take().map(|f| reference.similarity(&f)).unwrap_or(0.0);
                best = Some(best.map_or(similarity, |b: f64| b.max(similarity)));
                session.record(
                    PHASE,
                    AuditEvent::Similarity {
                        value: similarity,
                        threshold: config.similarity_threshold,
                    },
                );
                tracing::debug!(attempt, similarity, "compared with reference");
                if similarity >= config.similarity_threshold {
                    ConvergenceState::Converged
                } else {
                    ConvergenceState::Recovering
                }
            }
            ConvergenceState::Recovering => {
                session.press(PHASE, DeviceKey::Back).await;
                ConvergenceState::Capturing
            }
            ConvergenceState::Converged => {
                tracing::info!(attempts = attempt, similarity, "back on reference screen");
                return ConvergenceOutcome::Converged {
                    attempts: attempt,
                    similarity,
                };
            }
            ConvergenceState::GivenUp => {
                tracing::warn!(attempts = attempt, best_similarity = ?best, "could not return to reference screen");
                return ConvergenceOutcome::GivenUp {
                    attempts: attempt,
                    best_similarity: best,
                };
            }
        };

        session.record(
            PHASE,
            AuditEvent::Transition {
                from: state.as_str().to_string(),
                to: next.as_str().to_string(),
                attempt,
            },
        );
        state = next;
    }
}
