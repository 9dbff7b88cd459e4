//! Turns sparse position reports into continuous motion for one marker.
//!
//! Every observed coordinate starts a fresh animation window from the
//! previously observed coordinate to the new one. Inside the window the
//! rendered point moves linearly; outside it the endpoints are returned
//! exactly, so a marker never overshoots or oscillates.

use crate::geo::{calculate_bearing, lerp_position, normalize_bearing, shortest_rotation, GeoPoint};

pub const DEFAULT_ANIMATION_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimatorConfig {
    pub duration_ms: u64,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            duration_ms: DEFAULT_ANIMATION_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedPositionState {
    pub previous_position: GeoPoint,
    pub current_position: GeoPoint,
    /// Milliseconds on the caller's clock.
    pub animation_started_at: i64,
    pub duration_ms: u64,
    heading_from: Option<f64>,
    heading_to: Option<f64>,
    has_previous: bool,
}

impl AnimatedPositionState {
    /// Fraction of the window elapsed at `now_ms`, clamped to `[0, 1]`.
    pub fn progress(&self, now_ms: i64) -> f64 {
        if self.duration_ms == 0 {
            return 1.0;
        }
        let elapsed = now_ms.saturating_sub(self.animation_started_at) as f64;
        (elapsed / self.duration_ms as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionAnimator {
    config: AnimatorConfig,
    state: Option<AnimatedPositionState>,
    destination: Option<GeoPoint>,
}

impl PositionAnimator {
    pub fn new(config: AnimatorConfig) -> Self {
        Self {
            config,
            state: None,
            destination: None,
        }
    }

    pub fn state(&self) -> Option<&AnimatedPositionState> {
        self.state.as_ref()
    }

    pub fn destination(&self) -> Option<GeoPoint> {
        self.destination
    }

    /// Destination only steers the heading until a second position arrives.
    pub fn set_destination(&mut self, destination: Option<GeoPoint>) {
        self.destination = destination;
        if let Some(state) = self.state.as_mut() {
            if !state.has_previous {
                state.heading_to = destination.map(|d| calculate_bearing(state.current_position, d));
                state.heading_from = state.heading_to;
            }
        }
    }

    /// Records a raw position. Returns `false` when it repeats the current
    /// target, in which case the running animation is left alone.
    pub fn observe(&mut self, position: GeoPoint, now_ms: i64) -> bool {
        let duration_ms = self.config.duration_ms;
        let next = match self.state.take() {
            None => {
                let heading = self.destination.map(|d| calculate_bearing(position, d));
                AnimatedPositionState {
                    previous_position: position,
                    current_position: position,
                    animation_started_at: now_ms,
                    duration_ms,
                    heading_from: heading,
                    heading_to: heading,
                    has_previous: false,
                }
            }
            Some(state) if state.current_position == position => {
                self.state = Some(state);
                return false;
            }
            Some(state) => {
                let heading_from = heading_at(&state, now_ms);
                AnimatedPositionState {
                    previous_position: state.current_position,
                    current_position: position,
                    animation_started_at: now_ms,
                    duration_ms,
                    heading_from,
                    heading_to: Some(calculate_bearing(state.current_position, position)),
                    has_previous: true,
                }
            }
        };
        self.state = Some(next);
        true
    }

    pub fn current_render_position(&self, now_ms: i64) -> Option<GeoPoint> {
        let state = self.state.as_ref()?;
        let t = state.progress(now_ms);
        Some(if t <= 0.0 {
            state.previous_position
        } else if t >= 1.0 {
            state.current_position
        } else {
            lerp_position(state.previous_position, state.current_position, t)
        })
    }

    /// Heading the marker should point at `now_ms`, rotating along the
    /// shorter arc towards the latest bearing.
    pub fn current_heading(&self, now_ms: i64) -> Option<f64> {
        self.state.as_ref().and_then(|s| heading_at(s, now_ms))
    }

    pub fn target_heading(&self) -> Option<f64> {
        self.state.as_ref().and_then(|s| s.heading_to)
    }

    pub fn is_animating(&self, now_ms: i64) -> bool {
        self.state
            .as_ref()
            .map_or(false, |s| s.has_previous && s.progress(now_ms) < 1.0)
    }
}

fn heading_at(state: &AnimatedPositionState, now_ms: i64) -> Option<f64> {
    match (state.heading_from, state.heading_to) {
        (Some(from), Some(to)) => {
            let t = state.progress(now_ms);
            if t >= 1.0 {
                Some(to)
            } else {
                Some(normalize_bearing(from + shortest_rotation(from, to) * t))
            }
        }
        (None, to) => to,
        (from, None) => from,
    }
}
