//! Scene: the instanced grid, the floor it stands on, and the lights.
//!
//! # Invariants
//! - Construction is all-or-nothing: any layout or asset failure aborts it.
//! - All mutations after construction are logged so the frame scheduler can
//!   tell when baked shadows go stale.

mod config;
mod scene;

pub use config::{FloorConfig, HemisphereLight, SceneConfig, SpotLight};
pub use scene::{ConstructionError, Scene, SceneChanges, SceneEvent};

pub fn crate_info() -> &'static str {
    "gridlight-scene v0.1.0"
}
