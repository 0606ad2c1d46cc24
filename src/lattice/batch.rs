use rayon::prelude::*;

use crate::error::CtcError;
use crate::lattice::extended::{extend_labels, min_frames};
use crate::lattice::forward_backward;
use crate::lattice::gradient::cost_and_gradient;
use crate::types::{ActivationView, CtcOutput};

#[cfg(feature = "cuda-dp")]
#[path = "cuda/ctc_cuda.rs"]
pub mod cuda;

#[cfg(feature = "gpu-dp")]
#[path = "gpu/ctc_gpu.rs"]
pub mod gpu;

/// GPU DP threshold on total lattice work Σ Tᵢ·Sᵢ: below this, CPU beats
/// GPU launch overhead.
const GPU_DP_THRESHOLD: usize = 40_000;

/// Validate batch shapes before any per-sample work; a violation aborts the
/// whole call. Returns each sample's offset into the flat label stream.
pub fn validate_batch(
    view: &ActivationView<'_>,
    labels: &[usize],
    label_lengths: &[usize],
    frame_lengths: &[usize],
    blank_id: usize,
) -> Result<Vec<usize>, CtcError> {
    let batch = view.batch();
    let classes = view.classes();

    if label_lengths.len() != batch {
        return Err(CtcError::invalid_shape(format!(
            "label_lengths has {} entries for a batch of {batch}",
            label_lengths.len()
        )));
    }
    if frame_lengths.len() != batch {
        return Err(CtcError::invalid_shape(format!(
            "frame_lengths has {} entries for a batch of {batch}",
            frame_lengths.len()
        )));
    }
    if blank_id >= classes {
        return Err(CtcError::invalid_shape(format!(
            "blank id {blank_id} outside class range 0..{classes}"
        )));
    }

    let mut offsets = Vec::with_capacity(batch);
    let mut total_labels = 0usize;
    for (n, (&label_len, &frame_len)) in label_lengths.iter().zip(frame_lengths).enumerate() {
        if frame_len > view.frames() {
            return Err(CtcError::invalid_shape(format!(
                "sample {n}: frame length {frame_len} exceeds activation frames {}",
                view.frames()
            )));
        }
        offsets.push(total_labels);
        total_labels += label_len;
    }
    if total_labels != labels.len() {
        return Err(CtcError::invalid_shape(format!(
            "label stream holds {} ids but label_lengths sum to {total_labels}",
            labels.len()
        )));
    }
    for (n, (&offset, &label_len)) in offsets.iter().zip(label_lengths).enumerate() {
        if let Some(&label) = labels[offset..offset + label_len]
            .iter()
            .find(|&&label| label >= classes)
        {
            return Err(CtcError::invalid_label(n, label, classes));
        }
    }

    Ok(offsets)
}

/// Raw (un-normalized, un-reduced) batched loss.
///
/// Dispatch priority mirrors the per-backend availability checks:
/// 1. `cuda-dp` cudarc kernel
/// 2. `gpu-dp` wgpu (Vulkan/DX12/Metal)
/// 3. CPU fallback (always available)
pub fn compute_batch(
    view: &ActivationView<'_>,
    labels: &[usize],
    label_offsets: &[usize],
    label_lengths: &[usize],
    frame_lengths: &[usize],
    blank_id: usize,
) -> CtcOutput {
    let work: usize = label_lengths
        .iter()
        .zip(frame_lengths)
        .map(|(&l, &t)| t * (2 * l + 1))
        .sum();

    if work >= GPU_DP_THRESHOLD {
        #[cfg(feature = "cuda-dp")]
        {
            if let Some(out) =
                cuda::compute_batch_cuda(view, labels, label_offsets, label_lengths, frame_lengths, blank_id)
            {
                return out;
            }
            tracing::debug!("cuda CTC unavailable, falling back to CPU");
        }
        #[cfg(feature = "gpu-dp")]
        {
            if let Some(out) =
                gpu::compute_batch_gpu(view, labels, label_offsets, label_lengths, frame_lengths, blank_id)
            {
                return out;
            }
            tracing::debug!("wgpu CTC unavailable, falling back to CPU");
        }
    }

    compute_batch_cpu(view, labels, label_offsets, label_lengths, frame_lengths, blank_id)
}

/// CPU-only batched loss (always available). Samples fan out in parallel;
/// each worker owns its cost and a dense `Tᵢ × classes` gradient scratch,
/// scattered afterwards into the strided `(t, n, c)` block.
pub fn compute_batch_cpu(
    view: &ActivationView<'_>,
    labels: &[usize],
    label_offsets: &[usize],
    label_lengths: &[usize],
    frame_lengths: &[usize],
    blank_id: usize,
) -> CtcOutput {
    let batch = view.batch();
    let classes = view.classes();

    let per_sample: Vec<(f32, Vec<f32>)> = (0..batch)
        .into_par_iter()
        .map(|n| {
            let sample_labels = &labels[label_offsets[n]..label_offsets[n] + label_lengths[n]];
            sample_loss(view, n, sample_labels, frame_lengths[n], blank_id)
        })
        .collect();

    let mut costs = Vec::with_capacity(batch);
    let mut gradient = vec![0.0f32; view.frames() * batch * classes];
    for (n, (cost, grad)) in per_sample.into_iter().enumerate() {
        costs.push(cost);
        for t in 0..frame_lengths[n] {
            let dst = (t * batch + n) * classes;
            gradient[dst..dst + classes].copy_from_slice(&grad[t * classes..(t + 1) * classes]);
        }
    }

    CtcOutput { costs, gradient }
}

/// One sample through builder → engine → combiner.
fn sample_loss(
    view: &ActivationView<'_>,
    n: usize,
    sample_labels: &[usize],
    t_valid: usize,
    blank_id: usize,
) -> (f32, Vec<f32>) {
    let classes = view.classes();
    if t_valid < min_frames(sample_labels) {
        tracing::debug!(sample = n, "no feasible alignment, cost set to +inf");
        return (f32::INFINITY, vec![0.0f32; t_valid * classes]);
    }

    let extended = extend_labels(sample_labels, blank_id);
    let lattice = forward_backward::run(view, n, t_valid, &extended);
    let mut grad = vec![0.0f32; t_valid * classes];
    let cost = cost_and_gradient(&lattice, &extended, classes, &mut grad);
    if cost == f32::INFINITY {
        tracing::debug!(sample = n, "no feasible alignment, cost set to +inf");
    }
    (cost, grad)
}
