//! Pure gaze geometry: eye-local to world conversion, gaze point
//! estimation and the three-pass angle decomposition.

use glam::{EulerRot, Mat3, Quat, Vec3};

/// Sentinel returned by [`angles_local`] for a zero direction vector.
pub const DEGENERATE_ANGLES: Vec3 = Vec3::splat(999.0);

/// Mirror applied to eye-local gaze directions before rotating into the
/// world frame. The tracker reports directions in a left-handed eye
/// frame; flipping X aligns them with the head orientation. Preserved
/// exactly so output stays comparable with previously recorded datasets.
const EYE_MIRROR: Vec3 = Vec3::new(-1.0, 1.0, 1.0);

/// Eye-local gaze direction rotated into the world frame. Normalized.
pub fn eye_forward_world(eye_local: Vec3, head_rotation: Quat) -> Vec3 {
    head_rotation * (eye_local * EYE_MIRROR).normalize_or_zero()
}

/// Point along the gaze ray at an explicit distance from the head.
pub fn gaze_point(head_position: Vec3, distance: f32, world_gaze: Vec3) -> Vec3 {
    head_position + world_gaze * distance
}

/// Approximate fixation point, assuming fixation at the same depth as a
/// known target. Not a true depth estimate.
pub fn gaze_point_to_target(head_position: Vec3, target_position: Vec3, world_gaze: Vec3) -> Vec3 {
    let distance = (head_position - target_position).length();
    gaze_point(head_position, distance, world_gaze)
}

/// Rotation mapping +Z onto `forward` with `up` as the vertical hint,
/// matching the engine convention the recorded datasets assume.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let Some(z) = forward.try_normalize() else {
        return Quat::IDENTITY;
    };
    let x = match up.cross(z).try_normalize() {
        Some(x) => x,
        None => {
            // up is parallel to forward: pick any orthogonal basis
            let alt = if z.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
            alt.cross(z).normalize()
        }
    };
    let y = z.cross(x);
    Quat::from_mat3(&Mat3::from_cols(x, y, z))
}

/// Wraps an angle in degrees into (-180, 180].
pub fn wrap_degrees(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Euler components in degrees, in (x, y, z) order, under the Y-X-Z
/// rotation-order convention of the source engine.
fn euler_degrees(rotation: Quat) -> Vec3 {
    let (y, x, z) = rotation.to_euler(EulerRot::YXZ);
    Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

/// Angles in degrees between a reference frame and a world-frame target
/// direction.
///
/// The decomposition runs three look-rotations toward `to`, each with a
/// different up hint (world up, world forward, world right), and takes
/// one Euler component from each: x from the up pass, y from the forward
/// pass, z minus `z_offset` from the right pass. There is no single
/// unambiguous Euler decomposition for this; the pass/axis choice must
/// not change or outputs stop matching existing recordings. Every
/// component is wrapped into (-180, 180].
pub fn angles_to_target(to: Vec3, reference_frame: Quat, z_offset: f32) -> Vec3 {
    let inverse = reference_frame.inverse();
    let up_pass = euler_degrees(inverse * look_rotation(to, Vec3::Y));
    let forward_pass = euler_degrees(inverse * look_rotation(to, Vec3::Z));
    let right_pass = euler_degrees(inverse * look_rotation(to, Vec3::X));
    Vec3::new(
        wrap_degrees(up_pass.x),
        wrap_degrees(forward_pass.y),
        wrap_degrees(right_pass.z - z_offset),
    )
}

/// Same decomposition relative to the identity frame, for eye-in-head
/// angles. A zero input vector yields [`DEGENERATE_ANGLES`], never NaN.
pub fn angles_local(to: Vec3, z_offset: f32) -> Vec3 {
    if to == Vec3::ZERO {
        return DEGENERATE_ANGLES;
    }
    angles_to_target(to, Quat::IDENTITY, z_offset)
}
