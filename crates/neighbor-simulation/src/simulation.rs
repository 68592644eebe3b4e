//! GPU-based grid neighbor-search simulation manager.
//!
//! Owns every device buffer for the lifetime of the simulation: the
//! canonical particle store, the (cell, particle) pairing array, the
//! per-cell range table, the rearrangement scratch buffer and a staging
//! buffer for readbacks. All of them are allocated once at initialization,
//! sized from the power-of-two population and the grid cell count, and
//! reused every tick.

use crate::error::{InitError, ReadbackError};
use crate::params::{SimParams, SortPassParams};
use neighbor_core::reference::sort_pass_schedule;
use neighbor_core::{CellEntry, CellRange, ConfigError, GridSpec, Particle, SimConfig};
use wgpu::util::DeviceExt;

/// GPU neighbor-search simulation over a fixed population.
pub struct NeighborSimulation {
    device: wgpu::Device,
    queue: wgpu::Queue,

    params: SimParams,
    params_buffer: wgpu::Buffer,

    // Buffers
    particle_buffer: wgpu::Buffer,
    entry_buffer: wgpu::Buffer,
    range_buffer: wgpu::Buffer,
    sorted_particle_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,

    // Bitonic pass schedule, one offset-aligned uniform slot per pass
    sort_pass_buffer: wgpu::Buffer,
    sort_pass_count: u32,
    sort_pass_stride: u32,

    // Compute pipelines, one per stage
    assign_pipeline: wgpu::ComputePipeline,
    sort_pipeline: wgpu::ComputePipeline,
    reset_ranges_pipeline: wgpu::ComputePipeline,
    build_ranges_pipeline: wgpu::ComputePipeline,
    rearrange_pipeline: wgpu::ComputePipeline,
    search_pipeline: wgpu::ComputePipeline,
    integrate_pipeline: wgpu::ComputePipeline,

    main_bind_group: wgpu::BindGroup,
    sort_bind_group: wgpu::BindGroup,

    grid: GridSpec,
    particle_count: u32,
    cell_count: u32,
    destroyed: bool,
}

impl NeighborSimulation {
    /// Create the simulation over a pre-seeded population.
    ///
    /// The population length must already be a power of two (see
    /// `neighbor_core::seed_particles`, which rounds the configured count
    /// up). Fails fast on an invalid configuration before touching the
    /// device; buffer allocation runs inside an out-of-memory error scope
    /// so a failed allocation aborts construction with nothing left
    /// behind.
    pub async fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        particles: &[Particle],
        config: &SimConfig,
    ) -> Result<Self, InitError> {
        config.validate()?;
        if particles.is_empty() || !particles.len().is_power_of_two() {
            return Err(InitError::PopulationNotPowerOfTwo(particles.len()));
        }

        let particle_count = particles.len() as u32;
        let grid = config.grid();
        let cell_count = grid.cell_count();
        let params = SimParams::new(config, &grid, particle_count);

        log::info!(
            "Initializing NeighborSimulation: {} particles, {}^3 grid ({} cells)",
            particle_count,
            grid.resolution,
            cell_count
        );

        // All large buffers are created inside one error scope so that an
        // out-of-memory condition surfaces as a Result instead of a device
        // error after the fact.
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let particle_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Buffer"),
            contents: bytemuck::cast_slice(particles),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        let entry_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cell Entry Buffer"),
            size: (particle_count as u64) * std::mem::size_of::<CellEntry>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let range_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cell Range Buffer"),
            size: (cell_count as u64) * std::mem::size_of::<CellRange>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let particle_bytes = (particle_count as u64) * std::mem::size_of::<Particle>() as u64;
        let sorted_particle_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sorted Particle Buffer"),
            size: particle_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // Shared staging buffer for every readback; sized for the largest
        // source buffer.
        let range_bytes = (cell_count as u64) * std::mem::size_of::<CellRange>() as u64;
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: particle_bytes.max(range_bytes),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sim Params Buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        // Precompute the full bitonic pass schedule. Each pass gets its own
        // uniform slot, selected with a dynamic offset at dispatch time.
        let schedule = sort_pass_schedule(particle_count);
        let sort_pass_count = schedule.len() as u32;
        let sort_pass_stride = device
            .limits()
            .min_uniform_buffer_offset_alignment
            .max(std::mem::size_of::<SortPassParams>() as u32);
        let mut sort_pass_data =
            vec![0u8; (sort_pass_stride as usize) * schedule.len().max(1)];
        for (i, pass) in schedule.iter().enumerate() {
            let slot = SortPassParams {
                swap_distance: pass.swap_distance,
                block_size: pass.block_size,
                _pad: [0; 2],
            };
            let offset = i * sort_pass_stride as usize;
            sort_pass_data[offset..offset + std::mem::size_of::<SortPassParams>()]
                .copy_from_slice(bytemuck::bytes_of(&slot));
        }
        let sort_pass_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sort Pass Buffer"),
            contents: &sort_pass_data,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        if let Some(error) = device.pop_error_scope().await {
            return Err(InitError::Allocation(error));
        }

        log::info!("Buffers created ({} sort passes)", sort_pass_count);

        // One bind group covers every stage; the sort passes additionally
        // bind their per-pass parameters at group 1.
        let main_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Main Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 4,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let sort_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Sort Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Neighbor Pipeline Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/neighbor.wgsl").into()),
        });

        let main_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Main Pipeline Layout"),
                bind_group_layouts: &[&main_bind_group_layout],
                push_constant_ranges: &[],
            });

        let sort_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Sort Pipeline Layout"),
                bind_group_layouts: &[&main_bind_group_layout, &sort_bind_group_layout],
                push_constant_ranges: &[],
            });

        let create_pipeline = |label: &str, layout: &wgpu::PipelineLayout, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let assign_pipeline =
            create_pipeline("Assign Cells Pipeline", &main_pipeline_layout, "assign_cells");
        let sort_pipeline =
            create_pipeline("Bitonic Sort Pipeline", &sort_pipeline_layout, "sort_step");
        let reset_ranges_pipeline =
            create_pipeline("Reset Ranges Pipeline", &main_pipeline_layout, "reset_ranges");
        let build_ranges_pipeline =
            create_pipeline("Build Ranges Pipeline", &main_pipeline_layout, "build_ranges");
        let rearrange_pipeline =
            create_pipeline("Rearrange Pipeline", &main_pipeline_layout, "rearrange");
        let search_pipeline = create_pipeline(
            "Neighbor Search Pipeline",
            &main_pipeline_layout,
            "search_neighbors",
        );
        let integrate_pipeline =
            create_pipeline("Integrate Pipeline", &main_pipeline_layout, "integrate");

        log::info!("Pipelines created");

        let main_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Main Bind Group"),
            layout: &main_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particle_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: entry_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: range_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: sorted_particle_buffer.as_entire_binding(),
                },
            ],
        });

        let sort_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sort Bind Group"),
            layout: &sort_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &sort_pass_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<SortPassParams>() as u64),
                }),
            }],
        });

        Ok(Self {
            device,
            queue,
            params,
            params_buffer,
            particle_buffer,
            entry_buffer,
            range_buffer,
            sorted_particle_buffer,
            staging_buffer,
            sort_pass_buffer,
            sort_pass_count,
            sort_pass_stride,
            assign_pipeline,
            sort_pipeline,
            reset_ranges_pipeline,
            build_ranges_pipeline,
            rearrange_pipeline,
            search_pipeline,
            integrate_pipeline,
            main_bind_group,
            sort_bind_group,
            grid,
            particle_count,
            cell_count,
            destroyed: false,
        })
    }

    /// Advance the simulation by one tick.
    ///
    /// Records the fixed stage sequence into one command encoder and
    /// submits it; within the submission every compute pass (and the
    /// scratch copy-back) is a global barrier for the next, so no stage
    /// reads data the previous stage has not finished writing.
    pub fn step(&mut self, dt: f32) {
        if self.destroyed {
            log::warn!("step() called after destroy(); ignoring");
            return;
        }

        self.params.dt = dt;
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tick Encoder"),
            });

        let particle_groups = (self.particle_count + 63) / 64;
        let cell_groups = (self.cell_count + 63) / 64;

        // Stage 1: cell assignment
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Assign Cells Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.assign_pipeline);
            pass.set_bind_group(0, &self.main_bind_group, &[]);
            pass.dispatch_workgroups(particle_groups, 1, 1);
        }

        // Stage 2: bitonic sort, one dispatch per compare-and-swap pass.
        // The passes must not be fused; each depends on the previous one
        // having finished across the whole array.
        for pass_index in 0..self.sort_pass_count {
            let offset = pass_index * self.sort_pass_stride;
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Bitonic Sort Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.sort_pipeline);
            pass.set_bind_group(0, &self.main_bind_group, &[]);
            pass.set_bind_group(1, &self.sort_bind_group, &[offset]);
            pass.dispatch_workgroups(particle_groups, 1, 1);
        }

        // Stage 3: reset the range table, then record run boundaries
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Reset Ranges Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.reset_ranges_pipeline);
            pass.set_bind_group(0, &self.main_bind_group, &[]);
            pass.dispatch_workgroups(cell_groups, 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Build Ranges Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.build_ranges_pipeline);
            pass.set_bind_group(0, &self.main_bind_group, &[]);
            pass.dispatch_workgroups(particle_groups, 1, 1);
        }

        // Stage 4: rearrange into the scratch buffer, then copy back over
        // the canonical store. The copy is ordered after the pass, so the
        // store is never read and written concurrently.
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Rearrange Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.rearrange_pipeline);
            pass.set_bind_group(0, &self.main_bind_group, &[]);
            pass.dispatch_workgroups(particle_groups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(
            &self.sorted_particle_buffer,
            0,
            &self.particle_buffer,
            0,
            (self.particle_count as u64) * std::mem::size_of::<Particle>() as u64,
        );

        // Stage 5: neighbor search
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Neighbor Search Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.search_pipeline);
            pass.set_bind_group(0, &self.main_bind_group, &[]);
            pass.dispatch_workgroups(particle_groups, 1, 1);
        }

        // Stage 6: integration
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Integrate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.integrate_pipeline);
            pass.set_bind_group(0, &self.main_bind_group, &[]);
            pass.dispatch_workgroups(particle_groups, 1, 1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Read the canonical particle store back to the CPU.
    ///
    /// Intended for the presentation layer (and tests) once per tick,
    /// after [`step`](Self::step); renderers that bind the store directly
    /// should use [`particle_buffer`](Self::particle_buffer) instead.
    pub fn read_particles(&self) -> Result<Vec<Particle>, ReadbackError> {
        self.read_buffer(&self.particle_buffer, self.particle_count as usize)
    }

    /// Read the sorted pairing array (diagnostics and tests).
    pub fn read_cell_entries(&self) -> Result<Vec<CellEntry>, ReadbackError> {
        self.read_buffer(&self.entry_buffer, self.particle_count as usize)
    }

    /// Read the per-cell range table (diagnostics and tests).
    pub fn read_cell_ranges(&self) -> Result<Vec<CellRange>, ReadbackError> {
        self.read_buffer(&self.range_buffer, self.cell_count as usize)
    }

    fn read_buffer<T: bytemuck::Pod>(
        &self,
        buffer: &wgpu::Buffer,
        count: usize,
    ) -> Result<Vec<T>, ReadbackError> {
        if self.destroyed {
            return Err(ReadbackError::Destroyed);
        }

        let size = (count * std::mem::size_of::<T>()) as u64;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &self.staging_buffer, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = self.staging_buffer.slice(..size);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;

        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ReadbackError::Map(e)),
            // The callback was dropped unfired: the device went away.
            Err(_) => return Err(ReadbackError::Destroyed),
        }

        let out = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice(&data).to_vec()
        };
        self.staging_buffer.unmap();
        Ok(out)
    }

    /// Change the neighbor-search radius; takes effect on the next tick.
    ///
    /// Only the query radius changes — the grid keeps its initialization
    /// geometry, so a radius grown past the cell size will miss neighbors
    /// beyond the adjacent cells. Re-initialize to resize the grid.
    pub fn set_search_radius(&mut self, radius: f32) -> Result<(), ConfigError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ConfigError::NonPositiveSearchRadius(radius));
        }
        self.params.search_radius = radius;
        Ok(())
    }

    /// Change the target slot; takes effect on the next tick. Any value
    /// `>= particle_count` means "no target selected".
    pub fn set_target_index(&mut self, index: u32) {
        self.params.target_index = index;
    }

    /// Canonical particle count (power of two), for draw-call sizing.
    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    /// Grid cell count (`resolution³`).
    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }

    /// Grid geometry fixed at initialization.
    pub fn grid(&self) -> GridSpec {
        self.grid
    }

    /// Raw particle store for renderers that bind it as an instance
    /// buffer. Mutated by every tick; re-read after each [`step`](Self::step).
    pub fn particle_buffer(&self) -> &wgpu::Buffer {
        &self.particle_buffer
    }

    /// Release all device buffers. Idempotent: the first call destroys,
    /// later calls are no-ops. Dropping the simulation releases everything
    /// as well, so calling this is optional.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.particle_buffer.destroy();
        self.entry_buffer.destroy();
        self.range_buffer.destroy();
        self.sorted_particle_buffer.destroy();
        self.staging_buffer.destroy();
        self.params_buffer.destroy();
        self.sort_pass_buffer.destroy();
        self.destroyed = true;
        log::info!("Simulation buffers released");
    }
}
