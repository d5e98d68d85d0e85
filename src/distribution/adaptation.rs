//! Buffer-health quality ladder used by the distribution service.
//!
//! Independent of the ABR controller: it only looks at the viewer's
//! reported buffer and moves at most one step at a time,
//! except on a near-empty buffer where it drops straight to the lowest level.

use crate::catalog::{BitrateCatalog, BitrateLevel};

/// Below this the viewer drops to the lowest level
pub const CRITICAL_BUFFER: f64 = 20.0;
/// Below this the viewer steps down one level
pub const LOW_BUFFER: f64 = 40.0;
/// Above this the viewer steps up one level
pub const HEALTHY_BUFFER: f64 = 85.0;

/// Level to serve given the current label and buffer health. `None` when
/// `current` is not in the catalog.
pub fn target_level<'a>(catalog: &'a BitrateCatalog, current: &str, buffer_health: f64) -> Option<&'a BitrateLevel> {
    let current_level = catalog.by_label(current)?;
    let target = if buffer_health < CRITICAL_BUFFER {
        catalog.lowest()
    } else if buffer_health < LOW_BUFFER {
        catalog.step_down(current).unwrap_or(current_level)
    } else if buffer_health > HEALTHY_BUFFER {
        catalog.step_up(current).unwrap_or(current_level)
    } else {
        current_level
    };
    Some(target)
}
