//! Number of independent sampler trials per hypersurface.

use crate::error::EventFailure;

pub const MIN_OVERSAMPLES: usize = 2;
pub const MAX_OVERSAMPLES: usize = 100;
/// Target total particle count across all oversamples of one event.
pub const PARTICLE_BUDGET: f64 = 1e5;

/// `clamp(round(PARTICLE_BUDGET / mult), MIN_OVERSAMPLES, MAX_OVERSAMPLES)`.
///
/// `mult` comes from the initial condition and must be finite and positive.
pub fn estimate(event: &str, mult: f64) -> Result<usize, EventFailure> {
    if !mult.is_finite() || mult <= 0.0 {
        return Err(EventFailure::precondition(
            event,
            format!("multiplicity must be finite and positive, got {mult}"),
        ));
    }
    let raw = (PARTICLE_BUDGET / mult).round();
    let clamped = raw.clamp(MIN_OVERSAMPLES as f64, MAX_OVERSAMPLES as f64);
    Ok(clamped as usize)
}
