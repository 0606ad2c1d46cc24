use crate::error::CtcError;
use crate::types::{ActivationView, CtcOutput};

/// Backend seam for the raw (un-reduced, un-masked) batched loss.
///
/// Implementations receive pre-validated inputs and must return numerically
/// interchangeable results; which one runs is purely a performance choice.
pub trait BatchCompute: Send + Sync {
    fn compute(
        &self,
        activations: &ActivationView<'_>,
        labels: &[usize],
        label_offsets: &[usize],
        label_lengths: &[usize],
        frame_lengths: &[usize],
        blank_id: usize,
    ) -> Result<CtcOutput, CtcError>;
}
