//! Compute stages
//!
//! A stage is one compute entry point with its bindings resolved once: the
//! pipeline, the bind group and the workgroup count are all cached at
//! creation so per-frame dispatch is just "record into an encoder".

/// How a buffer is bound to a stage. Must match the WGSL declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Uniform,
    StorageRead,
    StorageReadWrite,
}

impl BindingKind {
    fn binding_type(self) -> wgpu::BindingType {
        let ty = match self {
            BindingKind::Uniform => wgpu::BufferBindingType::Uniform,
            BindingKind::StorageRead => wgpu::BufferBindingType::Storage { read_only: true },
            BindingKind::StorageReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
        };
        wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        }
    }
}

/// One buffer binding of a stage
pub struct StageBinding<'a> {
    pub binding: u32,
    pub kind: BindingKind,
    pub buffer: &'a wgpu::Buffer,
    /// Bound byte range from offset 0, whole buffer when `None`
    pub size: Option<wgpu::BufferSize>,
}

impl<'a> StageBinding<'a> {
    pub fn new(binding: u32, kind: BindingKind, buffer: &'a wgpu::Buffer) -> Self {
        Self {
            binding,
            kind,
            buffer,
            size: None,
        }
    }

    /// Bind only the first `size` bytes. A zero size binds the whole buffer.
    pub fn sized(binding: u32, kind: BindingKind, buffer: &'a wgpu::Buffer, size: u64) -> Self {
        Self {
            binding,
            kind,
            buffer,
            size: wgpu::BufferSize::new(size),
        }
    }

    fn resource(&self) -> wgpu::BindingResource<'a> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: self.buffer,
            offset: 0,
            size: self.size,
        })
    }
}

/// Everything needed to create a stage
pub struct StageDescriptor<'a> {
    pub label: &'a str,
    pub module: &'a wgpu::ShaderModule,
    pub entry_point: &'a str,
    pub bindings: &'a [StageBinding<'a>],
    /// Lanes per workgroup, must equal the entry point's `@workgroup_size`
    pub block_size: u32,
    /// Number of lanes the stage covers
    pub element_count: u32,
}

/// A resolved compute stage
pub struct ComputeStage {
    label: String,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    block_size: u32,
    workgroups: u32,
}

impl ComputeStage {
    pub fn new(device: &wgpu::Device, desc: &StageDescriptor<'_>) -> Self {
        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .bindings
            .iter()
            .map(|b| wgpu::BindGroupLayoutEntry {
                binding: b.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: b.kind.binding_type(),
                count: None,
            })
            .collect();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Layout", desc.label)),
            entries: &layout_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", desc.label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            module: desc.module,
            entry_point: desc.entry_point,
        });

        let entries: Vec<wgpu::BindGroupEntry> = desc
            .bindings
            .iter()
            .map(|b| wgpu::BindGroupEntry {
                binding: b.binding,
                resource: b.resource(),
            })
            .collect();

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", desc.label)),
            layout: &bind_group_layout,
            entries: &entries,
        });

        Self {
            label: desc.label.to_string(),
            pipeline,
            bind_group,
            block_size: desc.block_size,
            workgroups: desc.element_count.div_ceil(desc.block_size),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn workgroups(&self) -> u32 {
        self.workgroups
    }

    /// Record the stage as its own compute pass. Separate passes give wgpu a
    /// synchronization point between stages writing and reading the same buffers.
    pub fn dispatch(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.workgroups == 0 {
            return;
        }

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&self.label),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&self.pipeline);
        compute_pass.set_bind_group(0, &self.bind_group, &[]);
        compute_pass.dispatch_workgroups(self.workgroups, 1, 1);
    }
}
