//! Log-domain forward/backward recursion over the blank-interleaved lattice.
//!
//! The engine consumes raw logits and normalizes each frame internally
//! (log-softmax), so the loss is fused: no caller-side softmax pass exists,
//! and the gradient in `gradient.rs` is taken directly with respect to the
//! logits.

use crate::types::ActivationView;

/// Alpha/beta tables for one sample, scoped to a single loss invocation.
///
/// `alpha[t][s]` is the log-probability of every alignment prefix that
/// consumes frames `0..=t` and ends in extended position `s`; `beta[t][s]`
/// mirrors it for suffixes, with the emission at frame `t` included on both
/// sides.
pub struct SampleLattice {
    pub frames: usize,
    pub positions: usize,
    /// `frames × classes` log-softmax rows.
    pub log_probs: Vec<f32>,
    /// `frames × positions`, log domain.
    pub alpha: Vec<f32>,
    /// `frames × positions`, log domain.
    pub beta: Vec<f32>,
    /// `logsumexp` over the terminal alpha positions; `-inf` when no
    /// alignment is feasible.
    pub log_likelihood: f32,
}

/// Run both recursions for sample `n` over its valid frame range.
///
/// `extended` must come from `extend_labels`; `t_valid` is the sample's
/// frame length and must not exceed `view.frames()`.
pub fn run(view: &ActivationView<'_>, n: usize, t_valid: usize, extended: &[usize]) -> SampleLattice {
    let classes = view.classes();
    let s_len = extended.len();

    if t_valid == 0 {
        // No frames: the empty product is only a valid alignment when there
        // are no labels to emit.
        let log_likelihood = if s_len == 1 { 0.0 } else { f32::NEG_INFINITY };
        return SampleLattice {
            frames: 0,
            positions: s_len,
            log_probs: Vec::new(),
            alpha: Vec::new(),
            beta: Vec::new(),
            log_likelihood,
        };
    }

    let mut log_probs = vec![0.0f32; t_valid * classes];
    for t in 0..t_valid {
        log_softmax_row(view.frame_row(t, n), &mut log_probs[t * classes..(t + 1) * classes]);
    }

    let mut alpha = vec![f32::NEG_INFINITY; t_valid * s_len];
    let mut beta = vec![f32::NEG_INFINITY; t_valid * s_len];
    let final_floor = s_len.saturating_sub(2);

    // Forward: frame 0 can only start in the leading blank or the first label.
    alpha[0] = log_probs[extended[0]];
    if s_len > 1 {
        alpha[1] = log_probs[extended[1]];
    }
    for t in 1..t_valid {
        let remaining = t_valid - 1 - t;
        let start = final_floor.saturating_sub(2 * remaining);
        let end = (2 * t + 1).min(s_len - 1);
        let row = &log_probs[t * classes..(t + 1) * classes];
        let prev = (t - 1) * s_len;
        for s in start..=end {
            let stay = alpha[prev + s];
            let advance = if s >= 1 { alpha[prev + s - 1] } else { f32::NEG_INFINITY };
            // Skipping a blank is only legal between distinct labels.
            let skip = if s >= 2 && extended[s] != extended[s - 2] {
                alpha[prev + s - 2]
            } else {
                f32::NEG_INFINITY
            };
            alpha[t * s_len + s] = log_sum_exp3(stay, advance, skip) + row[extended[s]];
        }
    }

    // Backward, mirrored: frame T-1 must sit in a terminal position.
    let last = (t_valid - 1) * s_len;
    let last_row = &log_probs[(t_valid - 1) * classes..t_valid * classes];
    beta[last + s_len - 1] = last_row[extended[s_len - 1]];
    if s_len > 1 {
        beta[last + s_len - 2] = last_row[extended[s_len - 2]];
    }
    for t in (0..t_valid - 1).rev() {
        let remaining = t_valid - 1 - t;
        let start = final_floor.saturating_sub(2 * remaining);
        let end = (2 * t + 1).min(s_len - 1);
        let row = &log_probs[t * classes..(t + 1) * classes];
        let next = (t + 1) * s_len;
        for s in start..=end {
            let stay = beta[next + s];
            let advance = if s + 1 < s_len { beta[next + s + 1] } else { f32::NEG_INFINITY };
            let skip = if s + 2 < s_len && extended[s + 2] != extended[s] {
                beta[next + s + 2]
            } else {
                f32::NEG_INFINITY
            };
            beta[t * s_len + s] = log_sum_exp3(stay, advance, skip) + row[extended[s]];
        }
    }

    let terminal_last = alpha[last + s_len - 1];
    let terminal_prev = if s_len > 1 { alpha[last + s_len - 2] } else { f32::NEG_INFINITY };
    let log_likelihood = log_sum_exp2(terminal_last, terminal_prev);

    SampleLattice {
        frames: t_valid,
        positions: s_len,
        log_probs,
        alpha,
        beta,
        log_likelihood,
    }
}

/// Numerically stable log-softmax of one logit row.
fn log_softmax_row(logits: &[f32], out: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
    for (o, &x) in out.iter_mut().zip(logits) {
        *o = x - max - log_sum;
    }
}

#[inline]
pub(crate) fn log_sum_exp2(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

#[inline]
fn log_sum_exp3(a: f32, b: f32, c: f32) -> f32 {
    let max = a.max(b).max(c);
    if max == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }
    max + ((a - max).exp() + (b - max).exp() + (c - max).exp()).ln()
}
