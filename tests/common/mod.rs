//! Shared fixtures for the integration tests.
//!
//! Provides the component value types used across the suites, a helper that
//! registers them on a fresh manager, and a capturing `log::Log`
//! implementation so tests can assert on logged errors and warnings.

#![allow(dead_code)]

use std::cell::RefCell;
use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record};

use archetype_ecs::prelude::*;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Float3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Float3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Process-wide simulation clock, registered as a singleton.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Time {
    pub dt: f32,
    pub frame: u64,
}

/// A type without equality, so it cannot be tracked.
#[derive(Clone, Debug, Default)]
pub struct Opaque(pub u32);

// ─────────────────────────────────────────────────────────────────────────────
// Log capture
// ─────────────────────────────────────────────────────────────────────────────

thread_local! {
    static CAPTURED: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        CAPTURED.with(|captured| captured.borrow_mut().push((record.level(), record.args().to_string())));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

/// Installs the capturing logger and clears this thread's captured records.
pub fn capture_logs() {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    CAPTURED.with(|captured| captured.borrow_mut().clear());
}

/// Records logged on this thread since the last [`capture_logs`], at `level`.
pub fn logged(level: Level) -> Vec<String> {
    CAPTURED.with(|captured| {
        captured.borrow().iter().filter(|(l, _)| *l == level).map(|(_, m)| m.clone()).collect()
    })
}

/// Returns `true` if a record at `level` containing `needle` was captured.
pub fn logged_contains(level: Level, needle: &str) -> bool {
    logged(level).iter().any(|message| message.contains(needle))
}

// ─────────────────────────────────────────────────────────────────────────────
// World setup
// ─────────────────────────────────────────────────────────────────────────────

/// Registers the shared value types.
pub fn register_types(ecs: &mut EcsManager) {
    ecs.register_type(TypeDeclaration::tracked::<Float3>("Float3"));
    ecs.register_type(TypeDeclaration::tracked::<i32>("int"));
    ecs.register_type(TypeDeclaration::tracked::<f32>("float"));
    ecs.register_type(TypeDeclaration::of::<String>("string"));
    ecs.register_type(TypeDeclaration::of::<Opaque>("Opaque"));
    ecs.register_type(TypeDeclaration::of::<Time>("Time").singleton());
}

/// A manager with the shared types registered, using small chunks.
pub fn world() -> EcsManager {
    let config = EcsConfig::default().with_default_chunk_size(ArchetypeChunkSize::Dozens);
    let mut ecs = EcsManager::new(config);
    register_types(&mut ecs);
    ecs
}

/// Registers `{position, velocity}` as template `body`.
pub fn body_template(ecs: &mut EcsManager) -> u32 {
    ecs.register_template(
        TemplateDescription::new("body")
            .with("position", Float3::default())
            .with("velocity", Float3::default()),
    )
}
