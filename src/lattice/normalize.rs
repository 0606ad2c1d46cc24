use crate::config::Reduction;
use crate::types::CtcOutput;

/// Scale costs and gradient by the configured reduction. Infinite costs stay
/// infinite under any finite divisor.
pub fn apply_reduction(out: &mut CtcOutput, reduction: Reduction, frame_lengths: &[usize]) {
    let divisor = match reduction {
        Reduction::None => return,
        Reduction::BatchMean => out.costs.len().max(1) as f32,
        // Guard against an all-empty batch turning the scale into NaN.
        Reduction::FrameMean => frame_lengths.iter().sum::<usize>().max(1) as f32,
    };
    for cost in &mut out.costs {
        *cost /= divisor;
    }
    for g in &mut out.gradient {
        *g /= divisor;
    }
}

/// Force every gradient entry on padding frames (`t >= frame_lengths[n]`) to
/// exactly zero, whatever the backend left there. Runs after reduction.
pub fn mask_padding(
    gradient: &mut [f32],
    frame_lengths: &[usize],
    frames: usize,
    batch: usize,
    classes: usize,
) {
    for (n, &t_valid) in frame_lengths.iter().enumerate() {
        for t in t_valid..frames {
            let base = (t * batch + n) * classes;
            gradient[base..base + classes].fill(0.0);
        }
    }
}
