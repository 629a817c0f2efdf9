//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data. Every field has a default, so a JSON
//! file only needs to name what it changes:
//!
//! ```json
//! { "fixed_hz": 120.0, "quadtree": { "max_depth": 10 } }
//! ```
//!
//! The app inserts the active config into the world as a resource.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::math::{Rect, Vec2};

/// Spatial index settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadtreeConfig {
    /// Root cell. Elements outside it are still indexed, just less tightly.
    pub bounds: Rect,
    pub max_depth: u32,
    /// Leaf capacity before it splits.
    pub max_elements: usize,
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self {
            bounds: Rect::from_center_half_extents(Vec2::ZERO, Vec2::splat(4096.0)),
            max_depth: 8,
            max_elements: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed-update rate in steps per second.
    pub fixed_hz: f64,
    /// Most fixed steps run in a single frame.
    pub max_fixed_steps: u32,
    pub quadtree: QuadtreeConfig,
    /// Frames between quadtree cleanups. 0 disables periodic cleanup.
    pub cleanup_interval: u32,
    /// How far broad-phase boxes are inflated, so small moves skip reinsertion.
    pub broad_phase_margin: f32,
    /// Rows per task in parallel queries.
    pub par_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_hz: 60.0,
            max_fixed_steps: 5,
            quadtree: QuadtreeConfig::default(),
            cleanup_interval: 60,
            broad_phase_margin: 2.0,
            par_chunk_size: crate::ecs::query::DEFAULT_PAR_CHUNK,
        }
    }
}

impl EngineConfig {
    /// Parse a config, filling omitted fields with defaults. Out-of-range
    /// values are clamped with a warning.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.sanitized())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Length of one fixed step.
    pub fn fixed_step(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fixed_hz)
    }

    /// Clamp out-of-range values, warning about each one.
    pub(crate) fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();
        if !(self.fixed_hz.is_finite() && self.fixed_hz > 0.0) {
            log::warn!(
                "fixed_hz {} is not a positive rate, using {}",
                self.fixed_hz,
                defaults.fixed_hz
            );
            self.fixed_hz = defaults.fixed_hz;
        }
        if self.max_fixed_steps == 0 {
            log::warn!("max_fixed_steps must be at least 1");
            self.max_fixed_steps = 1;
        }
        if self.quadtree.bounds.is_empty() {
            log::warn!(
                "quadtree bounds {:?} are empty, using defaults",
                self.quadtree.bounds
            );
            self.quadtree.bounds = defaults.quadtree.bounds;
        }
        if self.quadtree.max_elements == 0 {
            log::warn!("quadtree max_elements must be at least 1");
            self.quadtree.max_elements = 1;
        }
        if !(self.broad_phase_margin >= 0.0) {
            log::warn!(
                "broad_phase_margin {} is negative, using 0",
                self.broad_phase_margin
            );
            self.broad_phase_margin = 0.0;
        }
        self.par_chunk_size = self.par_chunk_size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json(r#"{ "fixed_hz": 120.0, "quadtree": { "max_depth": 3 } }"#)
                .unwrap();
        assert_eq!(config.fixed_hz, 120.0);
        assert_eq!(config.quadtree.max_depth, 3);
        assert_eq!(config.quadtree.max_elements, 8);
        assert_eq!(config.max_fixed_steps, 5);
    }

    #[test]
    fn bad_values_are_clamped() {
        let config = EngineConfig::from_json(
            r#"{ "fixed_hz": -1.0, "max_fixed_steps": 0, "broad_phase_margin": -3.0 }"#,
        )
        .unwrap();
        assert_eq!(config.fixed_hz, 60.0);
        assert_eq!(config.max_fixed_steps, 1);
        assert_eq!(config.broad_phase_margin, 0.0);
    }

    #[test]
    fn survives_a_json_round_trip() {
        let mut config = EngineConfig::default();
        config.quadtree.bounds = Rect::from_xywh(0.0, 0.0, 640.0, 480.0);
        config.cleanup_interval = 0;
        let parsed = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn fixed_step_follows_rate() {
        let config = EngineConfig {
            fixed_hz: 50.0,
            ..EngineConfig::default()
        };
        assert_eq!(config.fixed_step(), Duration::from_millis(20));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EngineConfig::from_json("{ fixed_hz: ").is_err());
    }
}
