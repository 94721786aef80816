use std::{ops::Range, path::Path};

use bytemuck::{Pod, Zeroable};

use super::{check_range, ComputeMethod, Next, State};
use crate::{
    body::Vec3,
    config::Parameters,
    error::{ComputeError, DeviceError},
};

/// Built-in leapfrog kernel.
pub const KERNEL: &str = include_str!("leapfrog.wgsl");

const WORKGROUP_SIZE: u64 = 256;

// Every body is sent to the device as a `vec4<f32>`.
const ITEM_SIZE: u64 = 4 * 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Uniforms {
    gravitation: f32,
    timestep: f32,
    softening: f32,
    _padding0: f32,
    offset: u32,
    count: u32,
    total: u32,
    _padding1: u32,
}

struct Buffers {
    total: u64,
    count: u64,
    uniforms: wgpu::Buffer,
    position_mass: wgpu::Buffer,
    velocity: wgpu::Buffer,
    acceleration: wgpu::Buffer,
    next: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl Buffers {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, total: u64, count: u64) -> Self {
        let storage = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::STORAGE,
                size,
                mapped_at_creation: false,
            })
        };

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniforms buffer"),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::UNIFORM,
            size: std::mem::size_of::<Uniforms>() as u64,
            mapped_at_creation: false,
        });
        let position_mass = storage("Position buffer", total * ITEM_SIZE);
        let velocity = storage("Velocity buffer", total * ITEM_SIZE);
        let acceleration = storage("Acceleration buffer", total * ITEM_SIZE);

        let next = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Next buffer"),
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::STORAGE,
            size: 3 * count * ITEM_SIZE,
            mapped_at_creation: false,
        });

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging buffer"),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            size: 3 * count * ITEM_SIZE,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: position_mass.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: velocity.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: acceleration.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: next.as_entire_binding(),
                },
            ],
            label: Some("Leapfrog bind group"),
        });

        Self {
            total,
            count,
            uniforms,
            position_mass,
            velocity,
            acceleration,
            next,
            staging,
            bind_group,
        }
    }
}

/// A brute-force [`ComputeMethod`] running the leapfrog kernel on a compute device with
/// [wgpu](https://github.com/gfx-rs/wgpu).
///
/// The device, its queue and the compute pipeline are acquired when the backend is created and
/// released when it is dropped. Buffers are allocated on the first step and kept as long as the
/// number of bodies and the owned range size do not change. This struct should therefore not be
/// recreated every iteration.
///
/// The device computes in single precision: the state is converted to `f32` on upload and back to
/// `f64` on download.
pub struct DeviceBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    buffers: Option<Buffers>,
}

impl DeviceBackend {
    /// Creates a new [`DeviceBackend`] using the built-in kernel.
    #[inline]
    pub fn new() -> Result<Self, DeviceError> {
        Self::with_kernel(KERNEL)
    }

    /// Creates a new [`DeviceBackend`] using the kernel source stored at the given path.
    pub fn with_kernel_file(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| DeviceError::KernelRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::with_kernel(&source)
    }

    /// Creates a new [`DeviceBackend`] using the given kernel source.
    ///
    /// The kernel must use the bindings and entry point of [`KERNEL`].
    pub fn with_kernel(source: &str) -> Result<Self, DeviceError> {
        let (device, queue) = pollster::block_on(request_device())?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                layout_entry(0, wgpu::BufferBindingType::Uniform),
                layout_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(3, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(4, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
            label: Some("Leapfrog layout"),
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Leapfrog kernel"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compute layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Compute pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::KernelBuild(error.to_string()));
        }

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipeline,
            buffers: None,
        })
    }

    /// Uploads the state of every body and the parameters of the step for the bodies in `range`.
    pub fn upload_state(&mut self, state: &State<'_>, range: &Range<usize>, params: &Parameters) {
        let (total, count) = (state.len() as u64, range.len() as u64);

        if let Some(buffers) = &self.buffers {
            if buffers.total != total || buffers.count != count {
                self.buffers = None;
            }
        }

        let buffers = self.buffers.get_or_insert_with(|| {
            Buffers::new(&self.device, &self.bind_group_layout, total, count)
        });

        let uniforms = Uniforms {
            gravitation: params.gravitation as f32,
            timestep: params.timestep as f32,
            softening: params.softening as f32,
            offset: range.start as u32,
            count: count as u32,
            total: total as u32,
            ..Default::default()
        };

        let position_mass: Vec<[f32; 4]> = state
            .position
            .iter()
            .zip(state.mass)
            .map(|(position, &mass)| {
                let [x, y, z] = position.as_vec3().to_array();
                [x, y, z, mass as f32]
            })
            .collect();

        self.queue
            .write_buffer(&buffers.uniforms, 0, bytemuck::bytes_of(&uniforms));
        self.queue.write_buffer(
            &buffers.position_mass,
            0,
            bytemuck::cast_slice(&position_mass),
        );
        self.queue.write_buffer(
            &buffers.velocity,
            0,
            bytemuck::cast_slice(&to_device(state.velocity)),
        );
        self.queue.write_buffer(
            &buffers.acceleration,
            0,
            bytemuck::cast_slice(&to_device(state.acceleration)),
        );
    }

    /// Runs the kernel over the range of the last upload.
    pub fn run_step(&self) {
        let Some(buffers) = &self.buffers else {
            return;
        };

        let encoder_descriptor = wgpu::CommandEncoderDescriptor { label: None };
        let mut encoder = self.device.create_command_encoder(&encoder_descriptor);

        encoder.push_debug_group("Leapfrog step");
        {
            let workgroups = buffers.count.div_ceil(WORKGROUP_SIZE) as u32;
            let compute_pass_descriptor = wgpu::ComputePassDescriptor::default();
            let mut compute_pass = encoder.begin_compute_pass(&compute_pass_descriptor);

            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &buffers.bind_group, &[]);
            compute_pass.dispatch_workgroups(workgroups, 1, 1);
        }
        encoder.pop_debug_group();

        encoder.copy_buffer_to_buffer(
            &buffers.next,
            0,
            &buffers.staging,
            0,
            buffers.staging.size(),
        );

        self.queue.submit(Some(encoder.finish()));
    }

    /// Downloads the results of the last step into the owned slices of the next buffers.
    pub fn download_results(&self, next: Next<'_>) -> Result<(), DeviceError> {
        let Some(buffers) = &self.buffers else {
            return Ok(());
        };

        let (sender, receiver) = flume::bounded(1);

        let slice = buffers.staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver.recv_async()).map_err(|_| DeviceError::MapCancelled)??;

        let view = slice.get_mapped_range();
        let data: &[[f32; 4]] = bytemuck::cast_slice(&view);

        let outputs = next
            .position
            .iter_mut()
            .zip(next.velocity.iter_mut())
            .zip(next.acceleration.iter_mut());

        for (((position, velocity), acceleration), chunk) in outputs.zip(data.chunks_exact(3)) {
            *position = from_device(chunk[0]);
            *velocity = from_device(chunk[1]);
            *acceleration = from_device(chunk[2]);
        }

        drop(view);
        buffers.staging.unmap();

        Ok(())
    }
}

impl ComputeMethod for DeviceBackend {
    fn compute(
        &mut self,
        state: State<'_>,
        range: Range<usize>,
        params: &Parameters,
        next: Next<'_>,
    ) -> Result<(), ComputeError> {
        check_range(&state, &range, &next)?;

        if range.is_empty() {
            return Ok(());
        }

        self.upload_state(&state, &range, params);
        self.run_step();
        self.download_results(next)?;

        Ok(())
    }
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), DeviceError> {
    let instance = wgpu::Instance::default();

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or(DeviceError::NoAdapter)?;

    let info = adapter.get_info();
    log::info!("Using compute adapter {} ({:?})", info.name, info.backend);

    let device = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("gravstream device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        )
        .await?;

    Ok(device)
}

#[inline]
fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[inline]
fn to_device(vectors: &[Vec3]) -> Vec<[f32; 4]> {
    vectors
        .iter()
        .map(|vector| vector.as_vec3().extend(0.0).to_array())
        .collect()
}

#[inline]
fn from_device([x, y, z, _]: [f32; 4]) -> Vec3 {
    glam::Vec3::new(x, y, z).as_dvec3()
}
