use crate::data::prepare::Aabb;
use glam::{Mat4, Quat, Vec3};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

pub const FIELD_OF_VIEW_DEG: f32 = 60.0;
pub const DEFAULT_ZOOM: f32 = 0.8;
pub const ZOOM_MIN: f32 = 0.02;
pub const ZOOM_MAX: f32 = 2.0;
const ZOOM_STEP: f32 = 0.02;
const ROTATION_RAD_PER_PIXEL: f32 = 0.003;

/// Orbit camera in the Open3D view-control model.
///
/// The eye sits on the `front` ray through `lookat`, at a distance derived from `zoom`
/// and the scene's largest extent.
#[derive(Debug, Clone)]
pub struct Camera {
    pub lookat: Vec3,
    /// Unit vector from `lookat` towards the eye.
    pub front: Vec3,
    pub up: Vec3,
    pub zoom: f32,
    pub fov_y_rad: f32,
    pub aspect: f32,

    /// Largest side of the scene bounding box.
    max_extent: f32,
    /// Bounding-box diagonal, used for the clip planes.
    diameter: f32,
}

impl Camera {
    /// Default view: look-at origin, front -Z, up -Y, zoom 0.8.
    pub fn new(bounds: Option<Aabb>, aspect: f32) -> Self {
        let (max_extent, diameter) = bounds
            .map(|b| (b.max_extent(), b.diameter()))
            .filter(|(e, _)| *e > 0.0)
            .unwrap_or((1.0, 3f32.sqrt()));

        Self {
            lookat: Vec3::ZERO,
            front: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, -1.0, 0.0),
            zoom: DEFAULT_ZOOM,
            fov_y_rad: FIELD_OF_VIEW_DEG.to_radians(),
            aspect,
            max_extent,
            diameter,
        }
    }

    /// Eye-to-lookat distance.
    #[inline]
    pub fn distance(&self) -> f32 {
        self.zoom * self.max_extent / (self.fov_y_rad * 0.5).tan()
    }

    #[inline]
    pub fn eye(&self) -> Vec3 {
        self.lookat + self.front * self.distance()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.lookat, self.up)
    }

    /// Perspective projection with wgpu's [0, 1] depth range.
    pub fn proj(&self) -> Mat4 {
        let distance = self.distance();
        let near = (0.01 * self.max_extent).max(distance - 3.0 * self.diameter);
        let far = distance + 3.0 * self.diameter;
        Mat4::perspective_rh(self.fov_y_rad, self.aspect.max(1e-6), near, far)
    }

    #[inline]
    pub fn view_proj(&self) -> Mat4 {
        self.proj() * self.view()
    }

    /// Rotates `front` and `up` about `lookat` by a mouse drag of `(dx, dy)` pixels.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        let right = self.up.cross(self.front).normalize();
        let q = Quat::from_axis_angle(self.up, -dx * ROTATION_RAD_PER_PIXEL)
            * Quat::from_axis_angle(right, dy * ROTATION_RAD_PER_PIXEL);

        self.front = (q * self.front).normalize();
        self.up = (q * self.up).normalize();
    }

    /// Positive `steps` move closer.
    pub fn scale(&mut self, steps: f32) {
        self.zoom = (self.zoom - steps * ZOOM_STEP).clamp(ZOOM_MIN, ZOOM_MAX);
    }
}

pub struct CameraController {
    mouse_down: bool,
    last_mouse: Option<(f64, f64)>,
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraController {
    pub fn new() -> Self {
        Self {
            mouse_down: false,
            last_mouse: None,
        }
    }

    /// Handles window events and updates the camera.
    pub fn handle_event(&mut self, event: &WindowEvent, camera: &mut Camera) {
        match event {
            WindowEvent::MouseInput { button, state, .. } => {
                if *button == MouseButton::Left {
                    self.mouse_down = *state == ElementState::Pressed;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor_orbit((position.x, position.y), camera);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 120.0,
                };

                camera.scale(scroll);
            }
            _ => {}
        }
    }

    fn handle_cursor_orbit(&mut self, xy: (f64, f64), camera: &mut Camera) {
        if let Some(last) = self.last_mouse {
            if self.mouse_down {
                camera.orbit((xy.0 - last.0) as f32, (xy.1 - last.1) as f32);
            }
        }
        self.last_mouse = Some(xy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(side: f32) -> Aabb {
        Aabb {
            min: [0.0; 3],
            max: [side, side / 2.0, side / 4.0],
        }
    }

    #[test]
    fn default_eye_sits_on_negative_z() {
        let cam = Camera::new(Some(unit_box(2.0)), 16.0 / 9.0);

        // 0.8 * 2 / tan(30deg)
        let expected = 1.6 / (30f32.to_radians()).tan();
        assert!((cam.distance() - expected).abs() < 1e-4);

        let eye = cam.eye();
        assert!(eye.x.abs() < 1e-6 && eye.y.abs() < 1e-6);
        assert!((eye.z + expected).abs() < 1e-4);
    }

    #[test]
    fn origin_projects_to_screen_center() {
        let cam = Camera::new(Some(unit_box(10.0)), 1.0);
        let clip = cam.view_proj() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;

        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn empty_scene_still_has_a_usable_camera() {
        let cam = Camera::new(None, 1.0);
        assert!(cam.distance() > 0.0);
        assert!(cam.proj().is_finite());
    }

    #[test]
    fn zoom_is_clamped() {
        let mut cam = Camera::new(Some(unit_box(1.0)), 1.0);
        cam.scale(1000.0);
        assert_eq!(cam.zoom, ZOOM_MIN);
        cam.scale(-1000.0);
        assert_eq!(cam.zoom, ZOOM_MAX);
    }

    #[test]
    fn orbit_keeps_an_orthonormal_frame_and_distance() {
        let mut cam = Camera::new(Some(unit_box(4.0)), 1.0);
        let d = cam.distance();

        cam.orbit(120.0, -45.0);

        assert!((cam.front.length() - 1.0).abs() < 1e-5);
        assert!((cam.up.length() - 1.0).abs() < 1e-5);
        assert!(cam.front.dot(cam.up).abs() < 1e-5);
        assert!((cam.eye().length() - d).abs() < 1e-3);
        assert!(cam.front.distance(Vec3::new(0.0, 0.0, -1.0)) > 1e-3);
    }
}
