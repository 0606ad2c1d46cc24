//! GPU-accelerated batched CTC loss via wgpu compute shaders.
//!
//! Enabled with the `gpu-dp` feature flag. Falls back to CPU when the
//! feature is disabled or GPU initialization fails.
//!
//! The shader runs one workgroup per sample: the frame recursion is a
//! barrier-synchronized loop inside a single dispatch, with threads fanned
//! across extended positions — no per-frame launch overhead.

use std::sync::OnceLock;

use crate::types::{ActivationView, CtcOutput};

/// Shared GPU context, initialized once on first use.
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

static GPU_CTX: OnceLock<Option<GpuContext>> = OnceLock::new();

fn get_gpu_context() -> Option<&'static GpuContext> {
    GPU_CTX
        .get_or_init(|| {
            pollster::block_on(async {
                let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                    backends: wgpu::Backends::VULKAN
                        | wgpu::Backends::DX12
                        | wgpu::Backends::METAL,
                    ..Default::default()
                });

                let adapter = instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::HighPerformance,
                        compatible_surface: None,
                        force_fallback_adapter: false,
                    })
                    .await?;

                let (device, queue) = adapter
                    .request_device(
                        &wgpu::DeviceDescriptor {
                            label: Some("ctc-gpu"),
                            required_features: wgpu::Features::empty(),
                            required_limits: wgpu::Limits::default(),
                            ..Default::default()
                        },
                        None,
                    )
                    .await
                    .ok()?;

                let shader_src = include_str!("ctc.wgsl");
                let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("ctc-shader"),
                    source: wgpu::ShaderSource::Wgsl(shader_src.into()),
                });

                let bind_group_layout =
                    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("ctc-bgl"),
                        entries: &[
                            // 0: logits (read-only storage)
                            bgl_entry(0, true),
                            // 1: labels (read-only storage)
                            bgl_entry(1, true),
                            // 2: sample_meta (read-only storage)
                            bgl_entry(2, true),
                            // 3: params (uniform)
                            wgpu::BindGroupLayoutEntry {
                                binding: 3,
                                visibility: wgpu::ShaderStages::COMPUTE,
                                ty: wgpu::BindingType::Buffer {
                                    ty: wgpu::BufferBindingType::Uniform,
                                    has_dynamic_offset: false,
                                    min_binding_size: None,
                                },
                                count: None,
                            },
                            // 4: log-softmax scratch (read-write storage)
                            bgl_entry(4, false),
                            // 5: alpha (read-write storage)
                            bgl_entry(5, false),
                            // 6: beta (read-write storage)
                            bgl_entry(6, false),
                            // 7: grad (read-write storage)
                            bgl_entry(7, false),
                            // 8: costs (read-write storage)
                            bgl_entry(8, false),
                        ],
                    });

                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("ctc-pl"),
                        bind_group_layouts: &[&bind_group_layout],
                        push_constant_ranges: &[],
                    });

                let pipeline =
                    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some("ctc-pipeline"),
                        layout: Some(&pipeline_layout),
                        module: &shader,
                        entry_point: Some("ctc_main"),
                        compilation_options: Default::default(),
                        cache: None,
                    });

                Some(GpuContext {
                    device,
                    queue,
                    pipeline,
                    bind_group_layout,
                })
            })
        })
        .as_ref()
}

fn bgl_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Params struct matching the WGSL layout (32 bytes, uniform-aligned).
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParams {
    frames: u32,
    batch: u32,
    classes: u32,
    blank: u32,
    s_max: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// Host cost values at or above this are the shader's +inf stand-in.
const INF_SENTINEL_FLOOR: f32 = 1.0e30;

/// Run the batched CTC loss on GPU. Returns the same raw `CtcOutput` as the
/// CPU backend.
///
/// Returns `None` if GPU is unavailable — caller should fall back to CPU.
pub fn compute_batch_gpu(
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
        // Zero-sized tables have no GPU representation; the CPU path owns
        // this degenerate case.
        return None;
    }
    let ctx = get_gpu_context()?;

    let s_max = label_lengths.iter().map(|&l| 2 * l + 1).max().unwrap_or(1);
    let labels_u32: Vec<u32> = if labels.is_empty() {
        vec![0]
    } else {
        labels.iter().map(|&l| l as u32).collect()
    };
    let mut sample_meta = Vec::with_capacity(3 * batch);
    for n in 0..batch {
        sample_meta.push(label_offsets[n] as u32);
        sample_meta.push(label_lengths[n] as u32);
        sample_meta.push(frame_lengths[n] as u32);
    }

    let params = GpuParams {
        frames: frames as u32,
        batch: batch as u32,
        classes: classes as u32,
        blank: blank_id as u32,
        s_max: s_max as u32,
        _pad0: 0,
        _pad1: 0,
        _pad2: 0,
    };

    let device = &ctx.device;
    let queue = &ctx.queue;

    // --- Create GPU buffers ---
    let buf_logits = create_buffer_init(
        device,
        "logits",
        bytemuck::cast_slice(view.data()),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_labels = create_buffer_init(
        device,
        "labels",
        bytemuck::cast_slice(&labels_u32),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_meta = create_buffer_init(
        device,
        "sample_meta",
        bytemuck::cast_slice(&sample_meta),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_params = create_buffer_init(
        device,
        "params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM,
    );

    let block_size = (frames * batch * classes * 4) as u64;
    let buf_lp = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("log-probs"),
        size: block_size,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });

    let table_size = (batch * frames * s_max * 4) as u64;
    let buf_alpha = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("alpha"),
        size: table_size,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });
    let buf_beta = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("beta"),
        size: table_size,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });

    let buf_grad = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("grad"),
        size: block_size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let costs_size = (batch * 4) as u64;
    let buf_costs = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("costs"),
        size: costs_size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    // --- Staging buffers for readback ---
    let staging_grad = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging-grad"),
        size: block_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let staging_costs = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging-costs"),
        size: costs_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    // --- Bind group ---
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("ctc-bg"),
        layout: &ctx.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: buf_logits.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: buf_labels.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: buf_meta.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: buf_params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: buf_lp.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: buf_alpha.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: buf_beta.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 7,
                resource: buf_grad.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 8,
                resource: buf_costs.as_entire_binding(),
            },
        ],
    });

    // --- Dispatch: one workgroup per sample ---
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("ctc-enc"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("ctc-pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&ctx.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(batch as u32, 1, 1);
    }
    encoder.copy_buffer_to_buffer(&buf_grad, 0, &staging_grad, 0, block_size);
    encoder.copy_buffer_to_buffer(&buf_costs, 0, &staging_costs, 0, costs_size);
    queue.submit(std::iter::once(encoder.finish()));

    // --- Readback ---
    let grad_data = read_buffer(device, &staging_grad, block_size);
    let costs_data = read_buffer(device, &staging_costs, costs_size);

    let gradient: Vec<f32> = bytemuck::cast_slice::<u8, f32>(&grad_data).to_vec();
    let costs: Vec<f32> = bytemuck::cast_slice::<u8, f32>(&costs_data)
        .iter()
        .map(|&c| if c >= INF_SENTINEL_FLOOR { f32::INFINITY } else { c })
        .collect();

    Some(CtcOutput { costs, gradient })
}

/// Create a buffer initialized with data.
fn create_buffer_init(
    device: &wgpu::Device,
    label: &str,
    data: &[u8],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: data,
        usage,
    })
}

/// Blocking readback from a mappable buffer.
fn read_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer, size: u64) -> Vec<u8> {
    let slice = buffer.slice(..size);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).unwrap();
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .expect("GPU readback channel closed")
        .expect("GPU readback failed");
    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();
    data
}
