//! Rendering orchestrator. Owns the GPU context, the depth target, the point
//! pipeline and the egui renderer, and records one encoder per frame.

pub mod context;
pub mod pipelines;
pub mod targets;

use self::{context::GfxContext, pipelines::points::PointsPipeline, targets::Targets};
use crate::data::types::ChunkGpu;
use std::sync::Arc;
use winit::window::Window;

/// Dark grey, the usual point-cloud viewer backdrop. Display-referred (sRGB) values.
pub const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.1,
    g: 0.1,
    b: 0.1,
    a: 1.0,
};

/// Clear colour for the swap chain.
///
/// An sRGB surface encodes on store, so the clear value must be given in linear
/// space for the displayed grey to come out at [`BACKGROUND`].
pub fn clear_color(srgb_surface: bool) -> wgpu::Color {
    if !srgb_surface {
        return BACKGROUND;
    }
    wgpu::Color {
        r: srgb_to_linear(BACKGROUND.r),
        g: srgb_to_linear(BACKGROUND.g),
        b: srgb_to_linear(BACKGROUND.b),
        a: BACKGROUND.a,
    }
}

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Tessellated egui output for one frame.
pub struct Overlay {
    pub shapes: Vec<egui::ClippedPrimitive>,
    pub textures: egui::TexturesDelta,
    pub pixels_per_point: f32,
}

pub struct Renderer {
    pub gfx: GfxContext,
    pub targets: Targets,
    pub points: PointsPipeline,
    pub egui_renderer: egui_wgpu::Renderer,
    background: wgpu::Color,
}

impl Renderer {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let gfx = GfxContext::new(window).await?;

        let targets = Targets::new(&gfx.device, gfx.size);
        let points = PointsPipeline::new(&gfx.device, gfx.config.format, targets.depth_fmt);
        let egui_renderer = egui_wgpu::Renderer::new(&gfx.device, gfx.config.format, None, 1);
        let background = clear_color(gfx.is_srgb());
        log::debug!("Surface format {:?}, clear {:?}", gfx.config.format, background);

        Ok(Self {
            gfx,
            targets,
            points,
            egui_renderer,
            background,
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.gfx.resize(new_size);
            self.targets.resize(&self.gfx.device, new_size);
        }
    }

    /// Clears to the background, draws every chunk, then composites the overlay on top.
    pub fn render(&mut self, swap_view: &wgpu::TextureView, chunks: &[ChunkGpu], overlay: Overlay) {
        let Overlay {
            shapes,
            textures,
            pixels_per_point,
        } = overlay;
        let screen = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.gfx.config.width, self.gfx.config.height],
            pixels_per_point,
        };

        let mut encoder = self
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Points Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: swap_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.background),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.targets.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for chunk in chunks {
                self.points.draw_chunk(&mut pass, chunk);
            }
        }

        for (id, delta) in &textures.set {
            self.egui_renderer
                .update_texture(&self.gfx.device, &self.gfx.queue, *id, delta);
        }
        let callback_cmds = self.egui_renderer.update_buffers(
            &self.gfx.device,
            &self.gfx.queue,
            &mut encoder,
            &shapes,
            &screen,
        );

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Overlay Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: swap_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.egui_renderer.render(&mut pass, &shapes, &screen);
        }

        for id in &textures.free {
            self.egui_renderer.free_texture(id);
        }

        self.gfx.queue.submit(
            callback_cmds
                .into_iter()
                .chain(std::iter::once(encoder.finish())),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_surface_clears_with_display_grey() {
        assert_eq!(clear_color(false), BACKGROUND);
    }

    #[test]
    fn srgb_surface_clears_with_linearized_grey() {
        let c = clear_color(true);
        // ((0.1 + 0.055) / 1.055)^2.4
        assert!((c.r - 0.010_022_8).abs() < 1e-6, "{}", c.r);
        assert_eq!((c.r, c.r), (c.g, c.b));
        assert_eq!(c.a, 1.0);
    }

    #[test]
    fn srgb_transfer_matches_reference_points() {
        assert_eq!(srgb_to_linear(0.0), 0.0);
        assert!((srgb_to_linear(1.0) - 1.0).abs() < 1e-12);
        assert!((srgb_to_linear(0.04) - 0.04 / 12.92).abs() < 1e-12);
    }
}
