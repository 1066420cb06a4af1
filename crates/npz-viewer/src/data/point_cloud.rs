use crate::camera::Camera;
use crate::data::prepare::PreparedChunk;
use crate::data::types::{ChunkGpu, ChunkUniformStd140, PointInstance};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

/// Builds the uniform block for one chunk.
pub fn chunk_uniform(
    camera: &Camera,
    color: [f32; 3],
    viewport_size: [f32; 2],
    point_size_px: f32,
) -> ChunkUniformStd140 {
    ChunkUniformStd140 {
        view_proj: camera.view_proj().to_cols_array_2d(),
        color,
        point_size_px,
        viewport_size,
        _pad: [0.0; 2],
    }
}

/// Upload one prepared chunk to the GPU (instances + per-chunk UBO).
pub fn upload_chunk(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    chunk: &PreparedChunk,
    uniform: &ChunkUniformStd140,
) -> ChunkGpu {
    let instances: Vec<PointInstance> = chunk
        .points
        .par_iter()
        .map(|&pos| PointInstance { pos })
        .collect();

    let vtx = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Chunk Instances"),
        contents: bytemuck::cast_slice(&instances),
        usage: wgpu::BufferUsages::VERTEX,
    });

    let ubo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Chunk UBO"),
        contents: bytemuck::bytes_of(uniform),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });

    let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Chunk BindGroup"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: ubo.as_entire_binding(),
        }],
    });

    ChunkGpu {
        source: chunk.source,
        color: chunk.color,
        instances_len: instances.len() as u32,
        vtx,
        ubo,
        bind,
    }
}
