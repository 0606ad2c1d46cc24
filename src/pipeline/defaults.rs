use crate::error::CtcError;
use crate::lattice::batch::{compute_batch, compute_batch_cpu};
use crate::pipeline::traits::BatchCompute;
use crate::types::{ActivationView, CtcOutput};

/// Serial-per-sample execution (rayon across samples), never touches a GPU.
pub struct CpuBatchCompute;

impl BatchCompute for CpuBatchCompute {
    fn compute(
        &self,
        activations: &ActivationView<'_>,
        labels: &[usize],
        label_offsets: &[usize],
        label_lengths: &[usize],
        frame_lengths: &[usize],
        blank_id: usize,
    ) -> Result<CtcOutput, CtcError> {
        Ok(compute_batch_cpu(
            activations,
            labels,
            label_offsets,
            label_lengths,
            frame_lengths,
            blank_id,
        ))
    }
}

/// Work-size driven backend selection: GPU for large lattices (when a
/// feature-gated backend is available), CPU otherwise.
pub struct AutoBatchCompute;

impl BatchCompute for AutoBatchCompute {
    fn compute(
        &self,
        activations: &ActivationView<'_>,
        labels: &[usize],
        label_offsets: &[usize],
        label_lengths: &[usize],
        frame_lengths: &[usize],
        blank_id: usize,
    ) -> Result<CtcOutput, CtcError> {
        Ok(compute_batch(
            activations,
            labels,
            label_offsets,
            label_lengths,
            frame_lengths,
            blank_id,
        ))
    }
}
