//! Fused cost and gradient combiner.
//!
//! The gradient of the negative log-likelihood with respect to each logit is
//! `softmax(t, k) - occupancy(t, k)`, where the occupancy is the posterior
//! probability of emitting class `k` at frame `t` on a correct alignment.
//! Both terms come straight out of the lattice tables in one pass; no
//! standalone softmax backward step is ever materialized.

use super::forward_backward::{log_sum_exp2, SampleLattice};

/// Consume a sample's lattice and write its `frames × classes` gradient into
/// `grad`, returning the scalar cost. Infeasible samples cost `+inf` and
/// leave an all-zero gradient.
pub fn cost_and_gradient(lattice: &SampleLattice, extended: &[usize], classes: usize, grad: &mut [f32]) -> f32 {
    debug_assert_eq!(grad.len(), lattice.frames * classes);

    let ll = lattice.log_likelihood;
    if ll == f32::NEG_INFINITY {
        grad.fill(0.0);
        return f32::INFINITY;
    }

    let s_len = lattice.positions;
    let mut acc = vec![f32::NEG_INFINITY; classes];
    for t in 0..lattice.frames {
        acc.fill(f32::NEG_INFINITY);
        let row = t * s_len;
        for (s, &label) in extended.iter().enumerate() {
            let path = lattice.alpha[row + s] + lattice.beta[row + s];
            if path != f32::NEG_INFINITY {
                acc[label] = log_sum_exp2(acc[label], path);
            }
        }
        let lp_row = &lattice.log_probs[t * classes..(t + 1) * classes];
        let grad_row = &mut grad[t * classes..(t + 1) * classes];
        for c in 0..classes {
            // alpha + beta counts the emission at frame t twice; subtracting
            // the log-probability once yields the plain path mass.
            let occupancy = if acc[c] == f32::NEG_INFINITY {
                0.0
            } else {
                (acc[c] - lp_row[c] - ll).exp()
            };
            grad_row[c] = lp_row[c].exp() - occupancy;
        }
    }

    -ll
}
