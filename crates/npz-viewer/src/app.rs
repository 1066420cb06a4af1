use crate::{
    camera::{Camera, CameraController},
    data::{
        point_cloud::{chunk_uniform, upload_chunk},
        prepare::{DownsampleStats, Scene, SourceSummary},
        types::ChunkGpu,
    },
    renderer::{Overlay, Renderer},
    ui,
};
use anyhow::Result;
use std::sync::Arc;
use winit::{event::WindowEvent, window::Window};

pub struct App {
    pub renderer: Renderer,
    pub camera: Camera,
    pub camera_controller: CameraController,
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    pub chunks: Vec<ChunkGpu>,
    pub sources: Vec<SourceSummary>,
    pub totals: DownsampleStats,
    pub point_size_px: f32,
}

impl App {
    pub async fn new(window: Arc<Window>, point_size_px: f32) -> Result<Self> {
        let renderer = Renderer::new(window.clone()).await?;
        let size = renderer.gfx.size;

        let camera = Camera::new(None, size.width as f32 / size.height.max(1) as f32);

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            &*window,
            None,
            None,
        );

        Ok(Self {
            renderer,
            camera,
            camera_controller: CameraController::new(),
            egui_ctx,
            egui_state,
            chunks: Vec::new(),
            sources: Vec::new(),
            totals: DownsampleStats::default(),
            point_size_px,
        })
    }

    /// Uploads every non-empty chunk and frames the camera on the scene bounds.
    pub fn set_scene(&mut self, scene: Scene) {
        let size = self.renderer.gfx.size;
        self.camera = Camera::new(scene.bounds, size.width as f32 / size.height.max(1) as f32);

        let viewport_size = self.renderer.gfx.viewport_size();
        let device = &self.renderer.gfx.device;
        let layout = &self.renderer.points.chunk_layout;

        self.chunks = scene
            .chunks
            .iter()
            .filter(|c| !c.points.is_empty())
            .map(|c| {
                let uniform = chunk_uniform(&self.camera, c.color, viewport_size, self.point_size_px);
                upload_chunk(device, layout, c, &uniform)
            })
            .collect();

        log::info!(
            "Uploaded {} chunks ({} points) from {} sources",
            self.chunks.len(),
            scene.stats.kept,
            scene.sources.len()
        );
        if let Some(b) = scene.bounds {
            log::debug!(
                "Scene AABB min({:.2},{:.2},{:.2}) max({:.2},{:.2},{:.2}), eye distance {:.2}",
                b.min[0],
                b.min[1],
                b.min[2],
                b.max[0],
                b.max[1],
                b.max[2],
                self.camera.distance()
            );
        }

        self.sources = scene.sources;
        self.totals = scene.stats;
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.renderer.resize(new_size);
            self.camera.aspect = new_size.width as f32 / new_size.height as f32;
        }
    }

    /// Returns true when egui consumed the event.
    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(window, event);
        if response.consumed {
            return true;
        }

        self.camera_controller.handle_event(event, &mut self.camera);

        if let WindowEvent::Resized(physical_size) = event {
            self.resize(*physical_size);
        }

        false
    }

    pub fn render(&mut self, window: &Window) -> Result<(), wgpu::SurfaceError> {
        let frame = self.renderer.gfx.surface.get_current_texture()?;
        let swap_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let viewport_size = self.renderer.gfx.viewport_size();
        for chunk in &self.chunks {
            let ubo_data = chunk_uniform(&self.camera, chunk.color, viewport_size, self.point_size_px);
            self.renderer
                .gfx
                .queue
                .write_buffer(&chunk.ubo, 0, bytemuck::bytes_of(&ubo_data));
        }

        let egui_input = self.egui_state.take_egui_input(window);
        let output = self.egui_ctx.run(egui_input, |ctx| {
            ui::draw_hud(ctx, &self.sources, self.totals, self.camera.zoom);
        });
        self.egui_state
            .handle_platform_output(window, output.platform_output);

        let overlay = Overlay {
            shapes: self.egui_ctx.tessellate(output.shapes, output.pixels_per_point),
            textures: output.textures_delta,
            pixels_per_point: output.pixels_per_point,
        };
        self.renderer.render(&swap_view, &self.chunks, overlay);
        frame.present();

        Ok(())
    }
}
