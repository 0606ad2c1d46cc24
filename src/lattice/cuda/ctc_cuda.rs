//! CUDA-native batched CTC loss kernel via cudarc.
//!
//! One block per sample; the whole T-step recursion runs in a single launch
//! with block-level barriers. Only the gradient block and one cost per
//! sample are copied back to host.
//!
//! Feature-gated: `cuda-dp`

use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::compile_ptx;
use std::sync::{Arc, OnceLock};

use crate::types::{ActivationView, CtcOutput};

const KERNEL_SRC: &str = include_str!("ctc.cu");
const BLOCK_SIZE: u32 = 256;

/// Host cost values at or above this are the kernel's +inf stand-in.
const INF_SENTINEL_FLOOR: f32 = 1.0e30;

struct CudaCtcCtx {
    dev: Arc<CudaDevice>,
}

static CTX: OnceLock<Option<CudaCtcCtx>> = OnceLock::new();

fn get_ctx() -> Option<&'static CudaCtcCtx> {
    CTX.get_or_init(|| {
        let dev = CudaDevice::new(0).ok()?;
        let ptx = compile_ptx(KERNEL_SRC).ok()?;
        dev.load_ptx(ptx, "ctc", &["ctc_forward"]).ok()?;
        Some(CudaCtcCtx { dev })
    })
    .as_ref()
}

/// Run the batched CTC loss on GPU. Returns the same raw `CtcOutput` as the
/// CPU backend.
///
/// Returns `None` if CUDA is unavailable — caller should fall back to CPU.
pub fn compute_batch_cuda(
    view: &ActivationView<'_>,
    labels: &[usize],
    label_offsets: &[usize],
    label_lengths: &[usize],
    frame_lengths: &[usize],
    blank_id: usize,
) -> Option<CtcOutput> {
    let batch = view.batch();
    if batch == 0 {
        return Some(CtcOutput {
            costs: Vec::new(),
            gradient: Vec::new(),
        });
    }
    let frames = view.frames();
    let classes = view.classes();
    if frames == 0 {
        return None;
    }
    let ctx = get_ctx()?;
    let dev = &ctx.dev;

    let func: CudaFunction = dev.get_func("ctc", "ctc_forward")?;

    let s_max = label_lengths.iter().map(|&l| 2 * l + 1).max().unwrap_or(1);

    // Upload inputs (labels and meta are small: a few bytes per label/sample)
    let logits_dev: CudaSlice<f32> = dev.htod_copy(view.data().to_vec()).ok()?;
    let labels_i32: Vec<i32> = if labels.is_empty() {
        vec![0]
    } else {
        labels.iter().map(|&l| l as i32).collect()
    };
    let labels_dev: CudaSlice<i32> = dev.htod_copy(labels_i32).ok()?;
    let mut sample_meta = Vec::with_capacity(3 * batch);
    for n in 0..batch {
        sample_meta.push(label_offsets[n] as i32);
        sample_meta.push(label_lengths[n] as i32);
        sample_meta.push(frame_lengths[n] as i32);
    }
    let meta_dev: CudaSlice<i32> = dev.htod_copy(sample_meta).ok()?;
    let dims = vec![
        frames as i32,
        batch as i32,
        classes as i32,
        blank_id as i32,
        s_max as i32,
    ];
    let dims_dev: CudaSlice<i32> = dev.htod_copy(dims).ok()?;

    // Device scratch and outputs
    let block_len = frames * batch * classes;
    let table_len = batch * frames * s_max;
    let mut lp_dev: CudaSlice<f32> = dev.alloc_zeros(block_len).ok()?;
    let mut alpha_dev: CudaSlice<f32> = dev.alloc_zeros(table_len).ok()?;
    let mut beta_dev: CudaSlice<f32> = dev.alloc_zeros(table_len).ok()?;
    let mut grad_dev: CudaSlice<f32> = dev.alloc_zeros(block_len).ok()?;
    let mut costs_dev: CudaSlice<f32> = dev.alloc_zeros(batch).ok()?;

    let cfg = LaunchConfig {
        block_dim: (BLOCK_SIZE, 1, 1),
        grid_dim: (batch as u32, 1, 1),
        shared_mem_bytes: 0,
    };

    unsafe {
        func.launch(
            cfg,
            (
                &logits_dev,
                &labels_dev,
                &meta_dev,
                &dims_dev,
                &mut lp_dev,
                &mut alpha_dev,
                &mut beta_dev,
                &mut grad_dev,
                &mut costs_dev,
            ),
        )
    }
    .ok()?;

    // Readback only grad + costs (alpha/beta scratch stays on GPU)
    let gradient: Vec<f32> = dev.dtoh_sync_copy(&grad_dev).ok()?;
    let costs_host: Vec<f32> = dev.dtoh_sync_copy(&costs_dev).ok()?;
    let costs = costs_host
        .into_iter()
        .map(|c| if c >= INF_SENTINEL_FLOOR { f32::INFINITY } else { c })
        .collect();

    Some(CtcOutput { costs, gradient })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::batch::{compute_batch_cpu, validate_batch};

    #[test]
    fn cuda_matches_cpu() {
        let data: Vec<f32> = (0..5 * 2 * 4).map(|i| ((i * 5 % 13) as f32) * 0.25 - 1.5).collect();
        let view = ActivationView::new(&data, 5, 2, 4).unwrap();
        let labels = [3usize, 1, 2];
        let label_lengths = [2usize, 1];
        let frame_lengths = [5usize, 3];
        let offsets = validate_batch(&view, &labels, &label_lengths, &frame_lengths, 0).unwrap();

        let cpu = compute_batch_cpu(&view, &labels, &offsets, &label_lengths, &frame_lengths, 0);

        if let Some(cuda) =
            compute_batch_cuda(&view, &labels, &offsets, &label_lengths, &frame_lengths, 0)
        {
            for (i, (a, b)) in cpu.costs.iter().zip(&cuda.costs).enumerate() {
                assert!((a - b).abs() < 1e-4, "cost {i}: cpu {a} cuda {b}");
            }
            for (i, (a, b)) in cpu.gradient.iter().zip(&cuda.gradient).enumerate() {
                assert!((a - b).abs() < 1e-4, "grad {i}: cpu {a} cuda {b}");
            }
        } else {
            eprintln!("CUDA unavailable, skipping");
        }
    }
}
