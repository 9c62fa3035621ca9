//! Velocity tracking for doppler
//!
//! The engine wants a velocity with every position update. Game objects
//! usually only have a position, so the velocity is derived from the
//! difference between frames.

use crate::audio::params::{ChannelUpdate, ListenerPose};
use crate::foundation::math::{Transform, Vec3};
use std::time::Duration;

/// Derives velocity from successive positions
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityTracker {
    previous: Option<Vec3>,
}

impl VelocityTracker {
    /// Tracker with no history
    pub const fn new() -> Self {
        Self { previous: None }
    }

    /// Tracker that already knows where the object starts
    pub const fn starting_at(position: Vec3) -> Self {
        Self {
            previous: Some(position),
        }
    }

    /// Record this frame's position and return the velocity since the last
    /// one. Zero on the first sample and when no time has passed.
    pub fn sample(&mut self, position: Vec3, delta: Duration) -> Vec3 {
        let previous = self.previous.replace(position).unwrap_or(position);
        if delta.is_zero() {
            return Vec3::zeros();
        }
        (position - previous) / delta.as_secs_f32()
    }

    /// Position and velocity as a channel update
    pub fn update(&mut self, position: Vec3, delta: Duration) -> ChannelUpdate {
        let velocity = self.sample(position, delta);
        ChannelUpdate::moved(position, velocity)
    }

    /// Forget the history
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Keeps the listener pose up to date from a transform
///
/// When there is no listener object the last pose is kept with zero
/// velocity, so spatial sounds keep playing where they were last heard.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListenerTracker {
    velocity: VelocityTracker,
    pose: ListenerPose,
}

impl ListenerTracker {
    /// Listener at the origin facing -Z
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from the listener's transform, or `None` if there is no
    /// listener this frame
    pub fn update(&mut self, transform: Option<&Transform>, delta: Duration) -> ListenerPose {
        match transform {
            Some(transform) => {
                self.pose = ListenerPose {
                    position: transform.position,
                    velocity: self.velocity.sample(transform.position, delta),
                    forward: transform.forward(),
                    up: transform.up(),
                };
            }
            None => {
                self.velocity.reset();
                self.pose.velocity = Vec3::zeros();
            }
        }
        self.pose
    }

    /// Last computed pose
    pub const fn pose(&self) -> &ListenerPose {
        &self.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Quat;
    use approx::assert_relative_eq;

    const FRAME: Duration = Duration::from_millis(500);

    #[test]
    fn test_velocity_from_positions() {
        let mut tracker = VelocityTracker::new();
        assert_eq!(tracker.sample(Vec3::new(1.0, 0.0, 0.0), FRAME), Vec3::zeros());

        let velocity = tracker.sample(Vec3::new(2.0, 0.0, -1.0), FRAME);
        assert_relative_eq!(velocity, Vec3::new(2.0, 0.0, -2.0));
    }

    #[test]
    fn test_zero_delta_gives_zero_velocity() {
        let mut tracker = VelocityTracker::starting_at(Vec3::zeros());
        assert_eq!(tracker.sample(Vec3::new(5.0, 5.0, 5.0), Duration::ZERO), Vec3::zeros());
    }

    #[test]
    fn test_listener_follows_transform() {
        let mut listener = ListenerTracker::new();
        let turned = Transform::from_position_rotation(
            Vec3::new(0.0, 0.0, 0.0),
            Quat::from_axis_angle(&Vec3::y_axis(), std::f32::consts::FRAC_PI_2),
        );
        listener.update(Some(&turned), FRAME);

        let moved = Transform {
            position: Vec3::new(0.0, 0.0, -1.0),
            ..turned
        };
        let pose = listener.update(Some(&moved), FRAME);

        assert_relative_eq!(pose.velocity, Vec3::new(0.0, 0.0, -2.0));
        assert_relative_eq!(pose.forward, Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(pose.up, Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_missing_listener_keeps_position() {
        let mut listener = ListenerTracker::new();
        let start = Transform::from_translation(Vec3::new(1.0, 0.0, 0.0));
        listener.update(Some(&start), FRAME);
        listener.update(Some(&Transform::from_translation(Vec3::new(2.0, 0.0, 0.0))), FRAME);

        let pose = listener.update(None, FRAME);
        assert_eq!(pose.position, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(pose.velocity, Vec3::zeros());

        // History was dropped, so reappearing elsewhere is not a jump
        let pose = listener.update(Some(&Transform::from_translation(Vec3::new(50.0, 0.0, 0.0))), FRAME);
        assert_eq!(pose.velocity, Vec3::zeros());
    }
}
