//! Diagnostics snapshots.
//!
//! Enabled by the `diagnostics` feature flag. [`snapshot`] (or
//! [`App::diagnostics_snapshot`](crate::app::App::diagnostics_snapshot))
//! gathers frame timing, entity pool statistics, archetype summaries, system
//! timings, broad-phase quadtree statistics and recently captured log records
//! into a [`DiagSnapshot`] that serializes to JSON.
//!
//! Log capture only works when [`init_logger`] installed the logger; with any
//! other logger the `logs` list stays empty.

use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use log::{Log, Metadata, Record};
use serde::Serialize;

use crate::ecs::archetype::ArchetypeId;
use crate::ecs::system::SystemTiming;
use crate::ecs::world::World;
use crate::spatial::{BroadPhase, QuadtreeStats};
use crate::time::Time;

/// Most log records kept between snapshots.
const LOG_CAPACITY: usize = 500;
/// Most log records drained into one snapshot.
const LOGS_PER_SNAPSHOT: usize = 50;

// ── Snapshot types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DiagSnapshot {
    pub frame: u64,
    pub fps: f32,
    pub delta_ms: f32,
    pub elapsed_secs: f32,
    pub entity_count: usize,
    pub archetype_count: usize,
    pub entity_pool: EntityPoolStats,
    pub archetypes: Vec<ArchetypeSnapshot>,
    pub systems: Vec<SystemTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quadtree: Option<QuadtreeStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

impl DiagSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchetypeSnapshot {
    pub id: ArchetypeId,
    pub entity_count: usize,
    pub component_names: Vec<String>,
}

/// Entity pool statistics gathered by the world.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EntityPoolStats {
    pub total_slots: usize,
    pub free_count: usize,
    pub alive_count: usize,
    pub spawned_this_frame: u32,
    pub despawned_this_frame: u32,
}

impl EntityPoolStats {
    /// Share of slots sitting on the free list, in percent.
    pub fn fragmentation_pct(&self) -> f32 {
        if self.total_slots > 0 {
            self.free_count as f32 / self.total_slots as f32 * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp_secs: f32,
}

/// Gather a snapshot from `world`. `systems` are the timings of the frame
/// just run. Resets the world's per-frame spawn counters.
pub fn snapshot(world: &mut World, systems: Vec<SystemTiming>) -> DiagSnapshot {
    let (frame, fps, delta_ms, elapsed_secs) = match world.get_resource::<Time>() {
        Some(time) => (
            time.frame_count(),
            time.fps(),
            time.delta_secs() * 1000.0,
            time.elapsed_secs(),
        ),
        None => (0, 0.0, 0.0, 0.0),
    };
    let quadtree = world.get_resource::<BroadPhase>().map(BroadPhase::stats);

    DiagSnapshot {
        frame,
        fps,
        delta_ms,
        elapsed_secs,
        entity_count: world.entity_count(),
        archetype_count: world.archetype_count(),
        entity_pool: world.diagnostics_entity_stats(),
        archetypes: world.diagnostics_archetypes(),
        systems,
        quadtree,
        logs: drain_captured_logs(LOGS_PER_SNAPSHOT),
    }
}

// ── Log Capture ──────────────────────────────────────────────────────────

struct LogRing {
    entries: std::collections::VecDeque<LogEntry>,
}

impl LogRing {
    fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn drain(&mut self, max: usize) -> Vec<LogEntry> {
        let n = self.entries.len().min(max);
        self.entries.drain(..n).collect()
    }
}

static LOG_RING: Mutex<Option<LogRing>> = Mutex::new(None);
static LOG_START: OnceLock<Instant> = OnceLock::new();

/// Captures records into the ring buffer and forwards them to env_logger.
struct DiagLogger {
    inner: env_logger::Logger,
}

impl Log for DiagLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata) || metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &Record) {
        if self.inner.enabled(record.metadata()) {
            self.inner.log(record);
        }
        if record.level() > log::Level::Info && !self.inner.enabled(record.metadata()) {
            return;
        }

        let timestamp_secs = LOG_START
            .get()
            .map(|start| start.elapsed().as_secs_f32())
            .unwrap_or(0.0);
        let entry = LogEntry {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            timestamp_secs,
        };
        if let Ok(mut guard) = LOG_RING.lock() {
            if let Some(ring) = guard.as_mut() {
                ring.push(entry);
            }
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

static DIAG_LOGGER: OnceLock<DiagLogger> = OnceLock::new();

/// Install a logger that writes through env_logger (`RUST_LOG` applies) and
/// also keeps recent records, at least everything at `Info` and above, for
/// [`snapshot`].
///
/// Returns `false` if another logger was already installed; capture is then
/// disabled.
pub fn init_logger() -> bool {
    LOG_START.get_or_init(Instant::now);
    if let Ok(mut ring) = LOG_RING.lock() {
        ring.get_or_insert_with(|| LogRing {
            entries: std::collections::VecDeque::new(),
        });
    }

    let inner = env_logger::Builder::new().parse_default_env().build();
    let max_level = inner.filter();
    let logger = DIAG_LOGGER.get_or_init(|| DiagLogger { inner });

    if log::set_logger(logger).is_err() {
        log::warn!("a logger is already set, log capture disabled");
        return false;
    }
    log::set_max_level(max_level.max(log::LevelFilter::Info));
    true
}

/// Drain up to `max` captured log records, oldest first.
pub fn drain_captured_logs(max: usize) -> Vec<LogEntry> {
    let Ok(mut guard) = LOG_RING.lock() else {
        return Vec::new();
    };
    match guard.as_mut() {
        Some(ring) => ring.drain(max),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, Phase};
    use crate::ecs::HierarchyPlugin;
    use crate::math::Transform2d;
    use crate::spatial::{BroadPhasePlugin, Collider};
    use std::time::Duration;

    #[derive(Debug)]
    struct Marker;

    #[test]
    fn snapshot_reports_world_state() {
        let mut app = App::new();
        app.add_plugin(HierarchyPlugin)
            .add_plugin(BroadPhasePlugin)
            .add_system(Phase::Startup, |world: &mut World| {
                for i in 0..4 {
                    world.spawn((
                        Transform2d::from_xy(i as f32 * 100.0, 0.0),
                        Collider::rect(10.0, 10.0),
                    ));
                }
                world.spawn((Marker,));
            });
        app.tick(Duration::from_millis(16));

        let snap = app.diagnostics_snapshot();
        assert_eq!(snap.frame, 1);
        assert_eq!(snap.entity_count, 5);
        assert_eq!(snap.entity_pool.spawned_this_frame, 5);
        assert_eq!(snap.entity_pool.alive_count, 5);
        assert_eq!(snap.archetypes[0].entity_count, 4);
        assert!(
            snap.archetypes[0]
                .component_names
                .iter()
                .any(|name| name == "Collider")
        );
        assert_eq!(snap.quadtree.as_ref().map(|q| q.elements), Some(4));
        assert!(snap.systems.iter().any(|s| s.name == "propagate_transforms"));

        let json = snap.to_json().unwrap();
        assert!(json.contains("\"entity_count\":5"));

        // Counters reset after each snapshot.
        let again = app.diagnostics_snapshot();
        assert_eq!(again.entity_pool.spawned_this_frame, 0);
    }

    #[test]
    fn fragmentation_counts_free_slots() {
        let stats = EntityPoolStats {
            total_slots: 8,
            free_count: 2,
            alive_count: 6,
            ..EntityPoolStats::default()
        };
        assert_eq!(stats.fragmentation_pct(), 25.0);
    }

    #[test]
    fn ring_drops_oldest() {
        let mut ring = LogRing {
            entries: std::collections::VecDeque::new(),
        };
        for i in 0..LOG_CAPACITY + 3 {
            ring.push(LogEntry {
                level: "INFO".into(),
                target: "test".into(),
                message: i.to_string(),
                timestamp_secs: 0.0,
            });
        }
        let drained = ring.drain(2);
        assert_eq!(drained[0].message, "3");
        assert_eq!(drained[1].message, "4");
        assert_eq!(ring.entries.len(), LOG_CAPACITY - 2);
    }
}
