use crate::device::transport::DeviceTransport;
use crate::executor::budget::ActionBudget;
use crate::perception::types::Target;

/// Taps the centroid of `target` if the budget allows it.
///
/// Returns true only when the tap was dispatched and counted. A refusal does
/// no device I/O; a transport failure is logged and reported as false.
pub async fn act(transport: &dyn DeviceTransport, target: &Target, budget: &mut ActionBudget) -> bool {
    let (x, y) = target.centroid;
    let confidence = target.detection.confidence;

    if budget.is_exhausted() {
        tracing::warn!(
            x,
            y,
            confidence,
            count = budget.count(),
            limit = budget.limit(),
            "tap refused: action budget exhausted"
        );
        return false;
    }

    match transport.tap(x, y).await {
        Ok(()) => {
            budget.record();
            tracing::info!(
                x,
                y,
                confidence,
                label = %target.detection.label,
                count = budget.count(),
                limit = budget.limit(),
                "tapped"
            );
            true
        }
        Err(e) => {
            tracing::warn!(x, y, confidence, error = %e, "tap failed");
            false
        }
    }
}
