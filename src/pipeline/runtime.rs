use crate::config::CtcConfig;
use crate::error::CtcError;
use crate::lattice::batch::validate_batch;
use crate::lattice::normalize::{apply_reduction, mask_padding};
use crate::pipeline::traits::BatchCompute;
use crate::types::{ActivationView, CtcOutput};

/// Reentrant batched CTC loss. Configuration travels with the value; there
/// is no process-wide state, so unrelated batches may run concurrently.
pub struct CtcLoss {
    config: CtcConfig,
    compute: Box<dyn BatchCompute>,
}

pub(crate) struct CtcLossParts {
    pub config: CtcConfig,
    pub compute: Box<dyn BatchCompute>,
}

impl CtcLoss {
    pub(crate) fn from_parts(parts: CtcLossParts) -> Self {
        Self {
            config: parts.config,
            compute: parts.compute,
        }
    }

    pub fn config(&self) -> &CtcConfig {
        &self.config
    }

    /// Per-sample costs and the gradient of the reduced cost with respect to
    /// every logit. The activation buffer is only read; the gradient lands
    /// in a fresh buffer.
    ///
    /// `labels` is the flat concatenation of every sample's label sequence;
    /// `label_lengths` / `frame_lengths` give per-sample valid extents.
    /// Shape violations abort the whole call before any per-sample work;
    /// samples with no feasible alignment cost `+inf` with a zero gradient
    /// slice and do not abort the batch.
    pub fn compute(
        &self,
        activations: &ActivationView<'_>,
        labels: &[usize],
        label_lengths: &[usize],
        frame_lengths: &[usize],
    ) -> Result<CtcOutput, CtcError> {
        let label_offsets = validate_batch(
            activations,
            labels,
            label_lengths,
            frame_lengths,
            self.config.blank_id,
        )?;

        let mut out = self.compute.compute(
            activations,
            labels,
            &label_offsets,
            label_lengths,
            frame_lengths,
            self.config.blank_id,
        )?;

        apply_reduction(&mut out, self.config.reduction, frame_lengths);
        mask_padding(
            &mut out.gradient,
            frame_lengths,
            activations.frames(),
            activations.batch(),
            activations.classes(),
        );
        Ok(out)
    }

    /// Destructive-reuse variant: overwrites `activations` with the gradient
    /// once the logits have been consumed, and returns only the costs.
    ///
    /// The original activation values are gone after this call and must not
    /// be read again. Use [`CtcLoss::compute`] when the logits are still
    /// needed.
    pub fn compute_in_place(
        &self,
        activations: &mut [f32],
        frames: usize,
        batch: usize,
        classes: usize,
        labels: &[usize],
        label_lengths: &[usize],
        frame_lengths: &[usize],
    ) -> Result<Vec<f32>, CtcError> {
        let out = {
            let view = ActivationView::new(activations, frames, batch, classes)?;
            self.compute(&view, labels, label_lengths, frame_lengths)?
        };
        activations.copy_from_slice(&out.gradient);
        Ok(out.costs)
    }
}
