use crate::pointer::PointerState;

/// A high-level request produced by the desktop host from raw window events.
///
/// The scene and scheduler consume actions, never raw key codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Toggle the clicked state of whatever lies under the pointer.
    Select(PointerState),
    /// Freeze the shadow map at its current contents.
    BakeShadows,
    /// Return to per-frame shadow rendering.
    InvalidateShadows,
    /// Nudge the spot light, which invalidates baked shadows.
    NudgeLight(glam::Vec3),
    /// Show or hide the stats overlay.
    ToggleOverlay,
    /// No-op (used for input mapping that hasn't been bound yet).
    Noop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_carries_pointer() {
        let a = Action::Select(PointerState::new(0.5, -0.5));
        assert!(matches!(a, Action::Select(p) if p.x == 0.5));
    }

    #[test]
    fn shadow_actions_are_distinct() {
        assert_ne!(Action::BakeShadows, Action::InvalidateShadows);
        assert!(matches!(
            Action::NudgeLight(glam::Vec3::X),
            Action::NudgeLight(_)
        ));
    }
}
