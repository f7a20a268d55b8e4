//! WebGPU backend: FDTD, source injection and energy reduction as WGSL
//! compute shaders.
//!
//! All three field buffers, the coefficient field and the sponge mask stay
//! resident on the device. Rotation selects one of three pre-built bind
//! groups per pipeline, so advancing a time level never touches GPU memory.
//! Host transfers happen only for frame readback and the per-workgroup
//! energy partial sums.
//!
//! ## Dispatch order per step
//!
//! ```text
//! fdtd_step (16x16 groups) -> inject_source (1 group) -> rotate -> poll(Wait)
//! ```
//!
//! Each dispatch is its own submission on a single queue, so the stencil
//! write completes before the injection reads the next buffer.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::backend::WaveBackend;
use super::fields::{Rotation, Slot};
use super::kernel::{SATURATION, SPONGE_RATE, VISCOSITY};
use super::medium::Medium;
use super::source::SourceTap;
use crate::error::{Result, WaveError};

/// Tile edge of the stencil workgroup.
const STEP_WORKGROUP: u32 = 16;

/// Threads per reduction workgroup (must match the WGSL scratch array).
const REDUCE_WORKGROUP: u32 = 256;

/// Capacity of the tap buffer; a radius-3 disk has at most 29 taps.
const MAX_TAPS: usize = 64;

const WGSL_FDTD_SHADER: &str = r#"
struct StepParams {
    nx: u32,
    ny: u32,
    dt: f32,
    viscosity: f32,
    sponge_rate: f32,
    saturation: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> params: StepParams;
@group(0) @binding(1) var<storage, read> field_prev: array<f32>;
@group(0) @binding(2) var<storage, read> field_cur: array<f32>;
@group(0) @binding(3) var<storage, read_write> field_next: array<f32>;
@group(0) @binding(4) var<storage, read> coef: array<f32>;
@group(0) @binding(5) var<storage, read> sponge: array<f32>;

@compute @workgroup_size(16, 16)
fn fdtd_step(@builtin(global_invocation_id) gid: vec3u) {
    let x = gid.x;
    let y = gid.y;
    let nx = params.nx;

    // Boundary ring is never written
    if (x < 1u || y < 1u || x + 1u >= nx || y + 1u >= params.ny) {
        return;
    }

    let idx = y * nx + x;

    let c = field_cur[idx];
    let cn = field_cur[idx - nx];
    let cs = field_cur[idx + nx];
    let cw = field_cur[idx - 1u];
    let ce = field_cur[idx + 1u];

    let p = field_prev[idx];
    let pn = field_prev[idx - nx];
    let ps = field_prev[idx + nx];
    let pw = field_prev[idx - 1u];
    let pe = field_prev[idx + 1u];

    let laplacian = cn + cs + ce + cw - 4.0 * c;
    let laplacian_rate = (cn - pn) + (cs - ps) + (ce - pe) + (cw - pw) - 4.0 * (c - p);

    var value = 2.0 * c - p + coef[idx] * laplacian
        - params.viscosity * params.dt * laplacian_rate;

    let mask = sponge[idx];
    if (mask > 0.0) {
        value = value * max(0.0, 1.0 - params.sponge_rate * mask);
    }

    field_next[idx] = params.saturation * tanh(value / params.saturation);
}
"#;

const WGSL_INJECT_SHADER: &str = r#"
struct Tap {
    index: u32,
    weight: f32,
}

struct InjectParams {
    tap_count: u32,
    pulse: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> inject: InjectParams;
@group(0) @binding(1) var<storage, read_write> field_next: array<f32>;
@group(0) @binding(2) var<storage, read> taps: array<Tap>;

// Taps address distinct cells, so invocations never collide.
@compute @workgroup_size(64)
fn inject_source(@builtin(global_invocation_id) gid: vec3u) {
    let i = gid.x;
    if (i >= inject.tap_count) {
        return;
    }
    let tap = taps[i];
    field_next[tap.index] = field_next[tap.index] + inject.pulse * tap.weight;
}
"#;

const WGSL_ENERGY_SHADER: &str = r#"
struct ReduceParams {
    cell_count: u32,
    group_count: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<uniform> reduce: ReduceParams;
@group(0) @binding(1) var<storage, read> field: array<f32>;
@group(0) @binding(2) var<storage, read_write> partials: array<f32>;

var<workgroup> scratch: array<f32, 256>;

@compute @workgroup_size(256)
fn energy_partial(
    @builtin(local_invocation_id) lid: vec3u,
    @builtin(workgroup_id) wid: vec3u,
    @builtin(num_workgroups) groups: vec3u,
) {
    // Large grids dispatch a 2D grid of groups; flatten it.
    let group = wid.x + wid.y * groups.x;
    let cell = group * 256u + lid.x;

    var value = 0.0;
    if (cell < reduce.cell_count) {
        let p = field[cell];
        value = p * p;
    }
    scratch[lid.x] = value;
    workgroupBarrier();

    for (var stride = 128u; stride > 0u; stride = stride / 2u) {
        if (lid.x < stride) {
            scratch[lid.x] = scratch[lid.x] + scratch[lid.x + stride];
        }
        workgroupBarrier();
    }

    if (lid.x == 0u && group < reduce.group_count) {
        partials[group] = scratch[0];
    }
}
"#;

/// Stencil parameters (must match WGSL `StepParams`).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WgpuStepParams {
    nx: u32,
    ny: u32,
    dt: f32,
    viscosity: f32,
    sponge_rate: f32,
    saturation: f32,
    _pad0: u32,
    _pad1: u32,
}

/// Injection parameters (must match WGSL `InjectParams`).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WgpuInjectParams {
    tap_count: u32,
    pulse: f32,
    _pad0: u32,
    _pad1: u32,
}

/// Reduction parameters (must match WGSL `ReduceParams`).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WgpuReduceParams {
    cell_count: u32,
    group_count: u32,
    _pad1: u32,
    _pad2: u32,
}

/// WebGPU backend.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,

    step_pipeline: wgpu::ComputePipeline,
    inject_pipeline: wgpu::ComputePipeline,
    energy_pipeline: wgpu::ComputePipeline,

    /// Bind groups indexed by the physical index of the current buffer.
    step_groups: [wgpu::BindGroup; 3],
    inject_groups: [wgpu::BindGroup; 3],
    energy_groups: [wgpu::BindGroup; 3],

    fields: [wgpu::Buffer; 3],
    inject_params: wgpu::Buffer,
    taps: wgpu::Buffer,
    partials: wgpu::Buffer,
    partials_staging: wgpu::Buffer,
    field_staging: wgpu::Buffer,

    rotation: Rotation,
    nx: u32,
    ny: u32,
    reduce_grid: (u32, u32),
}

/// Lay `groups` workgroups out as a 2D grid with at most `max_per_dim`
/// groups along x.
fn reduce_grid(groups: u32, max_per_dim: u32) -> (u32, u32) {
    let x = groups.clamp(1, max_per_dim.max(1));
    (x, groups.div_ceil(x).max(1))
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
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

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    entry_point: &str,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point,
    })
}

fn bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

impl WgpuBackend {
    /// Open a device and upload the medium.
    pub async fn new(medium: &Medium) -> Result<Self> {
        if !medium.has_interior() {
            return Err(WaveError::device(
                "allocate field buffers",
                format!("grid {}x{} has no interior cells", medium.nx, medium.ny),
            ));
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| WaveError::BackendUnavailable("No WebGPU adapter found".to_string()))?;

        let info = adapter.get_info();
        tracing::info!("WGPU backend: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("WaveStream Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| WaveError::device("request device", e.to_string()))?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let cells = medium.len();
        let cell_count = u32::try_from(cells).map_err(|_| {
            WaveError::device(
                "allocate field buffers",
                format!("{} cells exceed the 32-bit index range", cells),
            )
        })?;
        let field_bytes = (cells * std::mem::size_of::<f32>()) as u64;
        let field_usage =
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let zeros = vec![0.0f32; cells];
        let fields = ["Field 0", "Field 1", "Field 2"].map(|label| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&zeros),
                usage: field_usage,
            })
        });

        let coef = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Coefficients"),
            contents: bytemuck::cast_slice(&medium.coef),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let sponge = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sponge"),
            contents: bytemuck::cast_slice(&medium.sponge),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let step_params = WgpuStepParams {
            nx: medium.nx as u32,
            ny: medium.ny as u32,
            dt: medium.dt,
            viscosity: VISCOSITY,
            sponge_rate: SPONGE_RATE,
            saturation: SATURATION,
            _pad0: 0,
            _pad1: 0,
        };
        let step_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Step Params"),
            contents: bytemuck::bytes_of(&step_params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let inject_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Inject Params"),
            size: std::mem::size_of::<WgpuInjectParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let taps = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Source Taps"),
            size: (MAX_TAPS * std::mem::size_of::<SourceTap>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let reduce_groups = cell_count.div_ceil(REDUCE_WORKGROUP);
        let max_per_dim = device.limits().max_compute_workgroups_per_dimension;
        let energy_grid = reduce_grid(reduce_groups, max_per_dim);
        if energy_grid.1 > max_per_dim {
            return Err(WaveError::device(
                "plan energy reduction",
                format!("{} workgroups exceed the dispatch limit", reduce_groups),
            ));
        }
        let reduce_params = WgpuReduceParams {
            cell_count,
            group_count: reduce_groups,
            _pad1: 0,
            _pad2: 0,
        };
        let reduce_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Reduce Params"),
            contents: bytemuck::bytes_of(&reduce_params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let partials_bytes = (reduce_groups as usize * std::mem::size_of::<f32>()) as u64;
        let partials = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Energy Partials"),
            size: partials_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let partials_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Energy Staging"),
            size: partials_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let field_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Staging"),
            size: field_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let step_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("FDTD Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, true),
                storage_entry(5, true),
            ],
        });
        let inject_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Inject Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, false), storage_entry(2, true)],
        });
        let energy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Energy Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
        });

        let step_pipeline = pipeline(&device, "FDTD Pipeline", WGSL_FDTD_SHADER, "fdtd_step", &step_layout);
        let inject_pipeline = pipeline(
            &device,
            "Inject Pipeline",
            WGSL_INJECT_SHADER,
            "inject_source",
            &inject_layout,
        );
        let energy_pipeline = pipeline(
            &device,
            "Energy Pipeline",
            WGSL_ENERGY_SHADER,
            "energy_partial",
            &energy_layout,
        );

        // Physical index c is "current"; (c+1)%3 is next, (c+2)%3 is previous.
        let step_groups = [0usize, 1, 2].map(|c| {
            bind_group(
                &device,
                "FDTD Bind Group",
                &step_layout,
                &[
                    &step_params,
                    &fields[(c + 2) % 3],
                    &fields[c],
                    &fields[(c + 1) % 3],
                    &coef,
                    &sponge,
                ],
            )
        });
        let inject_groups = [0usize, 1, 2].map(|c| {
            bind_group(
                &device,
                "Inject Bind Group",
                &inject_layout,
                &[&inject_params, &fields[(c + 1) % 3], &taps],
            )
        });
        let energy_groups = [0usize, 1, 2].map(|c| {
            bind_group(
                &device,
                "Energy Bind Group",
                &energy_layout,
                &[&reduce_params, &fields[c], &partials],
            )
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(WaveError::device("allocate device buffers", err.to_string()));
        }
        if let Some(err) = device.pop_error_scope().await {
            return Err(WaveError::device("create compute pipelines", err.to_string()));
        }

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            step_pipeline,
            inject_pipeline,
            energy_pipeline,
            step_groups,
            inject_groups,
            energy_groups,
            fields,
            inject_params,
            taps,
            partials,
            partials_staging,
            field_staging,
            rotation: Rotation::default(),
            nx: medium.nx as u32,
            ny: medium.ny as u32,
            reduce_grid: energy_grid,
        })
    }

    /// Name of the adapter in use.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        group: &wgpu::BindGroup,
        workgroups: (u32, u32),
    ) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Copy `size` bytes of `source` into `staging` and map them back.
    fn read_back(
        &self,
        operation: &'static str,
        source: &wgpu::Buffer,
        staging: &wgpu::Buffer,
        size: u64,
    ) -> Result<Vec<f32>> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| WaveError::device(operation, e.to_string()))?
            .map_err(|e| WaveError::device(operation, format!("Map failed: {:?}", e)))?;

        let data = slice.get_mapped_range();
        let values: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(values)
    }
}

impl WaveBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn step(&mut self) -> Result<()> {
        let c = self.rotation.index(Slot::Current);
        let groups = (
            self.nx.div_ceil(STEP_WORKGROUP),
            self.ny.div_ceil(STEP_WORKGROUP),
        );
        self.dispatch("FDTD Pass", &self.step_pipeline, &self.step_groups[c], groups);
        Ok(())
    }

    fn inject(&mut self, taps: &[SourceTap], pulse: f32) -> Result<()> {
        if taps.is_empty() {
            return Ok(());
        }
        if taps.len() > MAX_TAPS {
            return Err(WaveError::device(
                "inject source",
                format!("{} taps exceed capacity {}", taps.len(), MAX_TAPS),
            ));
        }

        let params = WgpuInjectParams {
            tap_count: taps.len() as u32,
            pulse,
            _pad0: 0,
            _pad1: 0,
        };
        self.queue
            .write_buffer(&self.inject_params, 0, bytemuck::bytes_of(&params));
        self.queue.write_buffer(&self.taps, 0, bytemuck::cast_slice(taps));

        let c = self.rotation.index(Slot::Current);
        self.dispatch(
            "Inject Pass",
            &self.inject_pipeline,
            &self.inject_groups[c],
            (1, 1),
        );
        Ok(())
    }

    fn rotate(&mut self) {
        self.rotation.advance();
    }

    fn synchronize(&mut self) -> Result<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn energy(&mut self) -> Result<f64> {
        let c = self.rotation.index(Slot::Current);
        self.dispatch(
            "Energy Pass",
            &self.energy_pipeline,
            &self.energy_groups[c],
            self.reduce_grid,
        );
        let size = self.partials.size();
        let partials = self.read_back("read energy partials", &self.partials, &self.partials_staging, size)?;
        Ok(partials.iter().map(|&p| p as f64).sum())
    }

    fn read_field(&mut self, out: &mut [f32]) -> Result<()> {
        let c = self.rotation.index(Slot::Current);
        let size = self.fields[c].size();
        let values = self.read_back("read field", &self.fields[c], &self.field_staging, size)?;
        if out.len() != values.len() {
            return Err(WaveError::device(
                "read field",
                format!("output holds {} cells, field has {}", out.len(), values.len()),
            ));
        }
        out.copy_from_slice(&values);
        Ok(())
    }
}
