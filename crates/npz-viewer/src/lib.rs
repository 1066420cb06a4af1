//! Interactive viewer for `.npz` point clouds.
//!
//! Sources are loaded with `pcnpz`, split into chunks, randomly downsampled,
//! coloured per source and drawn as instanced point sprites with wgpu.

pub mod app;
pub mod camera;
pub mod config;
pub mod data;
pub mod renderer;
pub mod ui;
