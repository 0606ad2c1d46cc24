//! Reference property suite: the lattice loss against explicit path
//! enumeration in f64, finite differences, reduction identities, padding and
//! infeasibility policies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ctc_rs::{ActivationView, CtcConfig, CtcError, CtcLossBuilder, LossInput, Reduction};

const SAMPLE_SEED: u64 = 42;

/// Time-major (frames x batch x classes) block from per-sample frame rows.
fn pack_batch(samples: &[Vec<Vec<f32>>], frames: usize, classes: usize) -> Vec<f32> {
    let batch = samples.len();
    let mut data = vec![0.0f32; frames * batch * classes];
    for (n, rows) in samples.iter().enumerate() {
        for (t, row) in rows.iter().enumerate() {
            let base = (t * batch + n) * classes;
            data[base..base + classes].copy_from_slice(row);
        }
    }
    data
}

fn blank_interleave(labels: &[usize], blank: usize) -> Vec<usize> {
    let mut ext = vec![blank];
    for &l in labels {
        ext.push(l);
        ext.push(blank);
    }
    ext
}

fn softmax_rows_f64(logit_rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    logit_rows
        .iter()
        .map(|row| {
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = row.iter().map(|&x| (x - max).exp()).sum();
            row.iter().map(|&x| (x - max).exp() / sum).collect()
        })
        .collect()
}

/// Sum of path products over every monotone alignment of the extended label
/// sequence onto the frames, by explicit recursion (no dynamic program).
fn enumerate_paths(probs: &[Vec<f64>], ext: &[usize], t: usize, s: usize) -> f64 {
    let p = probs[t][ext[s]];
    if t == probs.len() - 1 {
        // A complete path must end in one of the two terminal positions.
        return if s + 2 >= ext.len() { p } else { 0.0 };
    }
    let mut tails = enumerate_paths(probs, ext, t + 1, s);
    if s + 1 < ext.len() {
        tails += enumerate_paths(probs, ext, t + 1, s + 1);
    }
    if s + 2 < ext.len() && ext[s + 2] != ext[s] {
        tails += enumerate_paths(probs, ext, t + 1, s + 2);
    }
    p * tails
}

/// Brute-force likelihood of `labels` under softmax of `logit_rows`.
fn brute_force_likelihood(logit_rows: &[Vec<f64>], labels: &[usize], blank: usize) -> f64 {
    if logit_rows.is_empty() {
        return if labels.is_empty() { 1.0 } else { 0.0 };
    }
    let probs = softmax_rows_f64(logit_rows);
    let ext = blank_interleave(labels, blank);
    let mut total = enumerate_paths(&probs, &ext, 0, 0);
    if ext.len() > 1 {
        total += enumerate_paths(&probs, &ext, 0, 1);
    }
    total
}

fn single_sample_cost_and_grad(
    logit_rows: &[Vec<f32>],
    labels: &[usize],
    blank: usize,
    classes: usize,
) -> (f32, Vec<f32>) {
    let frames = logit_rows.len();
    let data = pack_batch(&[logit_rows.to_vec()], frames, classes);
    let view = ActivationView::new(&data, frames, 1, classes).unwrap();
    let loss = CtcLossBuilder::new(CtcConfig {
        blank_id: blank,
        reduction: Reduction::None,
    })
    .build();
    let out = loss
        .compute(&view, labels, &[labels.len()], &[frames])
        .unwrap();
    (out.costs[0], out.gradient)
}

#[test]
fn cost_agrees_with_path_enumeration() {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    for case in 0..60 {
        let frames = rng.random_range(1..=6);
        let classes = rng.random_range(2..=4);
        let label_len = rng.random_range(0..=2usize.min(frames));
        let labels: Vec<usize> = (0..label_len).map(|_| rng.random_range(1..classes)).collect();
        let rows: Vec<Vec<f32>> = (0..frames)
            .map(|_| (0..classes).map(|_| rng.random_range(-2.0..2.0)).collect())
            .collect();

        let (cost, _) = single_sample_cost_and_grad(&rows, &labels, 0, classes);

        let rows_f64: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| r.iter().map(|&x| x as f64).collect())
            .collect();
        let likelihood = brute_force_likelihood(&rows_f64, &labels, 0);
        if likelihood == 0.0 {
            assert_eq!(cost, f32::INFINITY, "case {case}: expected infeasible");
        } else {
            let expected = -(likelihood.ln()) as f32;
            assert!(
                (cost - expected).abs() < 1e-4 * expected.abs().max(1.0),
                "case {case}: cost {cost} vs enumeration {expected}"
            );
        }
    }
}

#[test]
fn cost_agrees_with_enumeration_for_nonzero_blank() {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED + 1);
    for _ in 0..20 {
        let classes = 4;
        let blank = classes - 1;
        let frames = rng.random_range(2..=5);
        let labels: Vec<usize> = (0..2).map(|_| rng.random_range(0..classes - 1)).collect();
        let rows: Vec<Vec<f32>> = (0..frames)
            .map(|_| (0..classes).map(|_| rng.random_range(-1.5..1.5)).collect())
            .collect();

        let (cost, _) = single_sample_cost_and_grad(&rows, &labels, blank, classes);
        let rows_f64: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| r.iter().map(|&x| x as f64).collect())
            .collect();
        let likelihood = brute_force_likelihood(&rows_f64, &labels, blank);
        if likelihood == 0.0 {
            assert_eq!(cost, f32::INFINITY);
        } else {
            let expected = -(likelihood.ln()) as f32;
            assert!((cost - expected).abs() < 1e-4 * expected.abs().max(1.0));
        }
    }
}

#[test]
fn gradient_matches_finite_differences_of_enumeration() {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED + 2);
    for case in 0..10 {
        let frames = rng.random_range(2..=5);
        let classes = 3;
        let label_len = rng.random_range(1..=2usize.min(frames));
        let labels: Vec<usize> = (0..label_len).map(|_| rng.random_range(1..classes)).collect();
        let rows_f64: Vec<Vec<f64>> = (0..frames)
            .map(|_| (0..classes).map(|_| rng.random_range(-2.0..2.0)).collect())
            .collect();
        if brute_force_likelihood(&rows_f64, &labels, 0) == 0.0 {
            continue;
        }
        let rows_f32: Vec<Vec<f32>> = rows_f64
            .iter()
            .map(|r| r.iter().map(|&x| x as f32).collect())
            .collect();
        let (_, grad) = single_sample_cost_and_grad(&rows_f32, &labels, 0, classes);

        let eps = 1e-4f64;
        for t in 0..frames {
            for c in 0..classes {
                let mut plus = rows_f64.clone();
                plus[t][c] += eps;
                let mut minus = rows_f64.clone();
                minus[t][c] -= eps;
                let fd = (-brute_force_likelihood(&plus, &labels, 0).ln()
                    + brute_force_likelihood(&minus, &labels, 0).ln())
                    / (2.0 * eps);
                let got = grad[t * classes + c] as f64;
                assert!(
                    (got - fd).abs() < 1e-4,
                    "case {case} (t={t}, c={c}): gradient {got} vs finite difference {fd}"
                );
            }
        }
    }
}

#[test]
fn two_frame_single_label_scenario_enumerates_exactly() {
    // Frame rows are already normalized probabilities, so the internal
    // log-softmax leaves them unchanged.
    let frame0 = [0.5f32, 0.3, 0.2];
    let frame1 = [0.6f32, 0.3, 0.1];
    let rows: Vec<Vec<f32>> = vec![
        frame0.iter().map(|p| p.ln()).collect(),
        frame1.iter().map(|p| p.ln()).collect(),
    ];

    // Extended sequence [blank, 1, blank]; monotone two-frame paths that end
    // in a terminal position (1 or the trailing blank):
    let p_blank_then_label = 0.5f32 * 0.3; // (blank, 1)
    let p_label_twice = 0.3 * 0.3; // (1, 1)
    let p_label_then_blank = 0.3 * 0.6; // (1, blank)
    let expected = -(p_blank_then_label + p_label_twice + p_label_then_blank).ln();

    let (cost, grad) = single_sample_cost_and_grad(&rows, &[1], 0, 3);
    assert!((cost - expected).abs() < 1e-5, "cost {cost} vs {expected}");

    // Cross-check every gradient entry against the f64 enumeration.
    let rows_f64: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| r.iter().map(|&x| x as f64).collect())
        .collect();
    let eps = 1e-5f64;
    for t in 0..2 {
        for c in 0..3 {
            let mut plus = rows_f64.clone();
            plus[t][c] += eps;
            let mut minus = rows_f64.clone();
            minus[t][c] -= eps;
            let fd = (-brute_force_likelihood(&plus, &[1], 0).ln()
                + brute_force_likelihood(&minus, &[1], 0).ln())
                / (2.0 * eps);
            let got = grad[t * 3 + c] as f64;
            assert!((got - fd).abs() < 1e-4, "(t={t}, c={c}): {got} vs {fd}");
        }
    }
}

fn reference_batch() -> (Vec<f32>, Vec<usize>, Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED + 3);
    let frames = 5;
    let classes = 4;
    let samples: Vec<Vec<Vec<f32>>> = (0..3)
        .map(|_| {
            (0..frames)
                .map(|_| (0..classes).map(|_| rng.random_range(-2.0..2.0)).collect())
                .collect()
        })
        .collect();
    let data = pack_batch(&samples, frames, classes);
    let labels = vec![1, 2, 3, 3, 1];
    let label_lengths = vec![2, 2, 1];
    let frame_lengths = vec![5, 4, 3];
    (data, labels, label_lengths, frame_lengths)
}

#[test]
fn reduction_identities_hold_elementwise() {
    let (data, labels, label_lengths, frame_lengths) = reference_batch();
    let view = ActivationView::new(&data, 5, 3, 4).unwrap();

    let run = |reduction| {
        CtcLossBuilder::new(CtcConfig {
            blank_id: 0,
            reduction,
        })
        .build()
        .compute(&view, &labels, &label_lengths, &frame_lengths)
        .unwrap()
    };
    let none = run(Reduction::None);
    let batch_mean = run(Reduction::BatchMean);
    let frame_mean = run(Reduction::FrameMean);

    let n = 3.0f32;
    let total_frames: usize = frame_lengths.iter().sum();
    for i in 0..3 {
        assert!((batch_mean.costs[i] - none.costs[i] / n).abs() < 1e-6);
        assert!((frame_mean.costs[i] - none.costs[i] / total_frames as f32).abs() < 1e-6);
    }
    let expected_frame_mean_sum: f32 = none.costs.iter().sum::<f32>() / total_frames as f32;
    assert!((frame_mean.costs.iter().sum::<f32>() - expected_frame_mean_sum).abs() < 1e-5);
    for (i, &g) in none.gradient.iter().enumerate() {
        assert!((batch_mean.gradient[i] - g / n).abs() < 1e-6);
        assert!((frame_mean.gradient[i] - g / total_frames as f32).abs() < 1e-6);
    }
}

#[test]
fn padding_gradient_is_zero_under_every_reduction() {
    let (data, labels, label_lengths, frame_lengths) = reference_batch();
    let view = ActivationView::new(&data, 5, 3, 4).unwrap();

    for reduction in [Reduction::None, Reduction::BatchMean, Reduction::FrameMean] {
        let out = CtcLossBuilder::new(CtcConfig {
            blank_id: 0,
            reduction,
        })
        .build()
        .compute(&view, &labels, &label_lengths, &frame_lengths)
        .unwrap();
        for (n, &t_valid) in frame_lengths.iter().enumerate() {
            for t in t_valid..5 {
                let base = (t * 3 + n) * 4;
                assert!(
                    out.gradient[base..base + 4].iter().all(|&g| g == 0.0),
                    "reduction {reduction:?}, sample {n}, frame {t}"
                );
            }
        }
    }
}

#[test]
fn infeasible_sample_leaves_the_rest_of_the_batch_intact() {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED + 4);
    let frames = 4;
    let classes = 3;
    let samples: Vec<Vec<Vec<f32>>> = (0..3)
        .map(|_| {
            (0..frames)
                .map(|_| (0..classes).map(|_| rng.random_range(-2.0..2.0)).collect())
                .collect()
        })
        .collect();
    let data = pack_batch(&samples, frames, classes);
    let view = ActivationView::new(&data, frames, 3, classes).unwrap();

    // Sample 1 packs two distinct labels into a single frame: no feasible alignment.
    let labels = vec![1, 1, 2, 2];
    let label_lengths = vec![1, 2, 1];
    let frame_lengths = vec![4, 1, 3];

    let loss = CtcLossBuilder::new(CtcConfig::default()).build();
    let out = loss
        .compute(&view, &labels, &label_lengths, &frame_lengths)
        .unwrap();

    assert_eq!(out.costs[1], f32::INFINITY);
    for t in 0..frames {
        let base = (t * 3 + 1) * classes;
        assert!(out.gradient[base..base + classes].iter().all(|&g| g == 0.0));
    }

    // The surviving samples match their standalone single-sample runs.
    for (n, (labels_n, t_valid)) in [(vec![1usize], 4usize), (vec![2], 3)].iter().enumerate() {
        let n = if n == 0 { 0 } else { 2 };
        let rows: Vec<Vec<f32>> = samples[n][..*t_valid].to_vec();
        let (cost, grad) = single_sample_cost_and_grad(&rows, labels_n, 0, classes);
        assert!((out.costs[n] - cost).abs() < 1e-6);
        for t in 0..*t_valid {
            for c in 0..classes {
                let batched = out.gradient[(t * 3 + n) * classes + c];
                let standalone = grad[t * classes + c];
                assert!((batched - standalone).abs() < 1e-6);
            }
        }
    }
}

#[test]
fn shape_violations_abort_the_whole_call() {
    let data = vec![0.0f32; 3 * 2 * 3];
    let view = ActivationView::new(&data, 3, 2, 3).unwrap();
    let loss = CtcLossBuilder::new(CtcConfig::default()).build();

    // Label stream longer than the lengths account for.
    let err = loss.compute(&view, &[1, 2, 1], &[1, 1], &[3, 3]).unwrap_err();
    assert!(matches!(err, CtcError::InvalidShape { .. }));

    // Frame length beyond the activation block, naming the sample.
    let err = loss.compute(&view, &[1, 2], &[1, 1], &[3, 4]).unwrap_err();
    assert!(err.to_string().contains("sample 1"));

    // Out-of-range label id, naming the sample.
    let err = loss.compute(&view, &[1, 7], &[1, 1], &[3, 3]).unwrap_err();
    match err {
        CtcError::InvalidLabel { sample, label, classes } => {
            assert_eq!((sample, label, classes), (1, 7, 3));
        }
        other => panic!("expected InvalidLabel, got {other}"),
    }
}

#[test]
fn integral_inputs_have_no_gradient() {
    let data = vec![0.1f32; 2 * 1 * 2];
    let view = ActivationView::new(&data, 2, 1, 2).unwrap();
    let loss = CtcLossBuilder::new(CtcConfig::default()).build();
    let out = loss.compute(&view, &[1], &[1], &[2]).unwrap();

    assert!(out.gradient_with(LossInput::Activations).is_some());
    assert!(out.gradient_with(LossInput::Labels).is_none());
    assert!(out.gradient_with(LossInput::LabelLengths).is_none());
    assert!(out.gradient_with(LossInput::FrameLengths).is_none());
}

#[test]
fn in_place_reuse_returns_costs_and_overwrites_activations() {
    let (data, labels, label_lengths, frame_lengths) = reference_batch();
    let view = ActivationView::new(&data, 5, 3, 4).unwrap();
    let loss = CtcLossBuilder::new(CtcConfig {
        blank_id: 0,
        reduction: Reduction::FrameMean,
    })
    .build();

    let fresh = loss
        .compute(&view, &labels, &label_lengths, &frame_lengths)
        .unwrap();

    let mut reused = data.clone();
    let costs = loss
        .compute_in_place(&mut reused, 5, 3, 4, &labels, &label_lengths, &frame_lengths)
        .unwrap();

    assert_eq!(costs, fresh.costs);
    assert_eq!(reused, fresh.gradient);
}
