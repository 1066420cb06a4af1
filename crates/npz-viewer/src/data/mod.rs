//! Data handling for the viewer.
//!
//! - `prepare`: chunking, downsampling and colouring of loaded point sets.
//! - `point_cloud`: GPU upload of prepared chunks.
//! - `types`: GPU buffer layouts.

pub mod point_cloud;
pub mod prepare;
pub mod types;

pub use self::prepare::{
    chunk, downsample, palette_color, prepare_scene, Aabb, DownsampleStats, Downsampled,
    PrepareOptions, PreparedChunk, Scene, SourceSummary, PALETTE,
};
pub use self::types::{ChunkGpu, ChunkUniformStd140, PointInstance};
