//! Device buffers with explicit element count, stride and lifetime
//!
//! Owned buffers are destroyed explicitly by their owner, never by a scene
//! object going out of scope.

use crate::error::{buffer_mapping_error, CullResult};
use bytemuck::Pod;
use wgpu::util::DeviceExt;

/// A GPU buffer plus the shape it was allocated for
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    label: String,
    element_count: u64,
    stride: u64,
}

impl DeviceBuffer {
    /// Allocate an uninitialized buffer. Zero-element buffers still reserve one
    /// element so they can be bound.
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        element_count: u64,
        stride: u64,
        usage: wgpu::BufferUsages,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: element_count.max(1) * stride,
            usage,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            label: label.to_string(),
            element_count,
            stride,
        }
    }

    /// Allocate a buffer initialized from a slice
    pub fn with_data<T: Pod>(
        device: &wgpu::Device,
        label: &str,
        data: &[T],
        usage: wgpu::BufferUsages,
    ) -> Self {
        let stride = std::mem::size_of::<T>() as u64;
        if data.is_empty() {
            return Self::new(device, label, 0, stride, usage);
        }

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage,
        });

        Self {
            buffer,
            label: label.to_string(),
            element_count: data.len() as u64,
            stride,
        }
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Bytes covered by `element_count` elements
    pub fn size_bytes(&self) -> u64 {
        self.element_count * self.stride
    }

    pub fn usage(&self) -> wgpu::BufferUsages {
        self.buffer.usage()
    }

    /// Free the device memory. The caller must make sure no submitted work
    /// still references the buffer.
    pub fn release(&self) {
        log::trace!("[Device Buffer] Releasing '{}'", self.label);
        self.buffer.destroy();
    }
}

/// Copy `size` bytes at `offset` out of `source` and return them as `T`s.
/// Blocks until the device has finished all prior work.
pub fn read_buffer<T: Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> CullResult<Vec<T>> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Cull Readback Buffer"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Cull Readback"),
    });
    encoder.copy_buffer_to_buffer(source, offset, &readback, 0, size);
    queue.submit(Some(encoder.finish()));

    let buffer_slice = readback.slice(..);
    let (sender, receiver) = flume::bounded(1);
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|e| buffer_mapping_error("readback recv", e))?
        .map_err(|e| buffer_mapping_error("readback map_async", e))?;

    let values = {
        let data = buffer_slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    readback.unmap();
    readback.destroy();

    Ok(values)
}
