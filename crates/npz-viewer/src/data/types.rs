//! GPU-facing data layouts for the point renderer.

/// Per-instance data uploaded to the GPU vertex buffer.
/// Must match the instance inputs in `points.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct PointInstance {
    /// Point position in the archive's own frame.
    pub pos: [f32; 3],
}

/// Per-chunk uniform buffer data, respecting std140 layout.
/// Must match `ChunkUniform` in `points.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct ChunkUniformStd140 {
    pub view_proj: [[f32; 4]; 4],
    /// Linear RGB colour shared by every point of the chunk.
    pub color: [f32; 3],
    /// Point sprite size in physical pixels.
    pub point_size_px: f32,
    /// Size of the viewport in physical pixels.
    pub viewport_size: [f32; 2],
    pub _pad: [f32; 2],
}

/// GPU resources of one render chunk.
#[derive(Debug)]
pub struct ChunkGpu {
    /// Index of the source this chunk came from.
    pub source: usize,
    pub color: [f32; 3],
    pub instances_len: u32,

    /// Vertex buffer containing `PointInstance` data.
    pub vtx: wgpu::Buffer,
    /// Uniform buffer containing `ChunkUniformStd140` data.
    pub ubo: wgpu::Buffer,
    /// Bind group connecting the UBO to the pipeline.
    pub bind: wgpu::BindGroup,
}
