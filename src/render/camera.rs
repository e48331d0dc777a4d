use crate::render::pick::Ray;
use crate::scene::bounds::BoundingSphere;
use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

const DEFAULT_POSITION: Vec3 = Vec3::new(0.0, 2.0, 5.0);
const DEFAULT_TARGET: Vec3 = Vec3::new(0.0, 0.75, 0.0);
const DEFAULT_NEAR: f32 = 0.1;
const DEFAULT_FAR: f32 = 1000.0;
const DEFAULT_MIN_DISTANCE: f32 = 0.5;
const DEFAULT_MAX_DISTANCE: f32 = 50.0;
/// Extra room around a framed model.
const FRAME_MARGIN: f32 = 1.25;
/// Smallest radius the framing math works with.
const MIN_FRAME_RADIUS: f32 = 0.05;
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: DEFAULT_POSITION,
            target: DEFAULT_TARGET,
            up: Vec3::Y,
            fov_y: 45f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Right-handed perspective with depth in 0..1.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect.max(1e-3), self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    pub fn horizontal_fov(&self) -> f32 {
        2.0 * ((self.fov_y * 0.5).tan() * self.aspect).atan()
    }

    /// World-space ray through a pixel. `screen` is in physical pixels with
    /// the origin at the top-left corner.
    pub fn ray_from_screen(&self, screen: Vec2, viewport: Vec2) -> Option<Ray> {
        if viewport.x <= 0.0 || viewport.y <= 0.0 {
            return None;
        }
        let ndc = Vec2::new(
            2.0 * screen.x / viewport.x - 1.0,
            1.0 - 2.0 * screen.y / viewport.y,
        );
        let inverse = self.view_projection().inverse();
        let near = inverse * ndc.extend(0.0).extend(1.0);
        let far = inverse * ndc.extend(1.0).extend(1.0);
        if near.w.abs() < f32::EPSILON || far.w.abs() < f32::EPSILON {
            return None;
        }
        let near = near.xyz() / near.w;
        let far = far.xyz() / far.w;
        Ray::new(near, far - near)
    }

    /// Distance from the camera to its orbit target.
    pub fn distance(&self) -> f32 {
        self.position.distance(self.target)
    }
}

/// Allowed camera-to-target distance range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitLimits {
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for OrbitLimits {
    fn default() -> Self {
        Self {
            min_distance: DEFAULT_MIN_DISTANCE,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

/// Orbit camera with framing. Owns the camera the renderer draws with.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraRig {
    pub camera: Camera,
    pub limits: OrbitLimits,
}

impl CameraRig {
    pub fn new(aspect: f32) -> Self {
        let mut rig = Self::default();
        rig.camera.aspect = aspect;
        rig
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.camera.aspect = aspect;
        }
    }

    /// Places the camera so `sphere` fills the view along a fixed elevated
    /// diagonal. `None` (or a non-finite sphere) restores the default pose.
    pub fn frame(&mut self, sphere: Option<BoundingSphere>) {
        let Some(sphere) = sphere.filter(BoundingSphere::is_finite) else {
            self.reset();
            return;
        };
        let radius = sphere.radius.max(MIN_FRAME_RADIUS);
        let half_fov = self.camera.fov_y.min(self.camera.horizontal_fov()) * 0.5;
        let distance = radius / half_fov.sin() * FRAME_MARGIN;
        let direction = Vec3::new(1.0, 0.6, 1.0).normalize();

        self.camera.target = sphere.center;
        self.camera.position = sphere.center + direction * distance;
        self.camera.near = distance / 100.0;
        self.camera.far = distance * 100.0;
        self.limits = OrbitLimits {
            min_distance: radius * 0.5,
            max_distance: radius * 20.0,
        };
        log::debug!(
            "framed sphere at {:?} r={:.3}: distance {:.3}",
            sphere.center,
            radius,
            distance
        );
    }

    pub fn reset(&mut self) {
        let aspect = self.camera.aspect;
        *self = Self::new(aspect);
    }

    /// Rotates the camera around its target. Pitch stays short of the poles.
    pub fn orbit(&mut self, yaw_delta: f32, pitch_delta: f32) {
        if !yaw_delta.is_finite() || !pitch_delta.is_finite() {
            return;
        }
        let offset = self.camera.position - self.camera.target;
        let distance = offset.length().max(1e-4);
        let (mut yaw, mut pitch) = offset_to_yaw_pitch(offset);
        yaw += yaw_delta;
        pitch = (pitch + pitch_delta).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        wrap_angle(&mut yaw);
        self.camera.position = self.camera.target + yaw_pitch_to_offset(yaw, pitch) * distance;
    }

    /// Scales the camera-to-target distance by `factor`, clamped to the
    /// current limits.
    pub fn zoom(&mut self, factor: f32) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let offset = self.camera.position - self.camera.target;
        let distance = (offset.length() * factor)
            .clamp(self.limits.min_distance, self.limits.max_distance);
        let direction = match offset.try_normalize() {
            Some(direction) => direction,
            None => Vec3::Z,
        };
        self.camera.position = self.camera.target + direction * distance;
    }
}

fn offset_to_yaw_pitch(offset: Vec3) -> (f32, f32) {
    let len = offset.length().max(1e-6);
    let yaw = offset.z.atan2(offset.x);
    let pitch = (offset.y / len).clamp(-1.0, 1.0).asin();
    (yaw, pitch)
}

fn yaw_pitch_to_offset(yaw: f32, pitch: f32) -> Vec3 {
    let cos_pitch = pitch.cos();
    Vec3::new(yaw.cos() * cos_pitch, pitch.sin(), yaw.sin() * cos_pitch)
}

fn wrap_angle(angle: &mut f32) {
    const TWO_PI: f32 = std::f32::consts::PI * 2.0;
    if angle.is_finite() {
        *angle = (*angle + std::f32::consts::PI).rem_euclid(TWO_PI) - std::f32::consts::PI;
    }
}
