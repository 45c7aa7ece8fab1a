use std::collections::VecDeque;

/// Pointer position in normalized device coordinates, +y up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerState {
    pub x: f32,
    pub y: f32,
}

impl PointerState {
    /// Build a pointer, clamping both axes to [-1, 1]. NaN maps to 0.
    pub fn new(x: f32, y: f32) -> Self {
        let clamp = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) };
        Self {
            x: clamp(x),
            y: clamp(y),
        }
    }

    /// Convert window pixel coordinates (origin top-left, +y down).
    pub fn from_window(px: f64, py: f64, width: u32, height: u32) -> Self {
        let w = width.max(1) as f64;
        let h = height.max(1) as f64;
        Self::new((px / w * 2.0 - 1.0) as f32, (1.0 - py / h * 2.0) as f32)
    }
}

/// Size of the visible region in world units at the look-at distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::at_distance(45.0_f32.to_radians(), 16.0 / 9.0, 5.5)
    }
}

impl Viewport {
    /// Frustum cross-section of a perspective camera at `distance`.
    pub fn at_distance(fov_y: f32, aspect: f32, distance: f32) -> Self {
        let height = 2.0 * (fov_y / 2.0).tan() * distance.abs();
        Self {
            width: height * aspect,
            height,
        }
    }
}

/// Everything the camera rig reads from the input side in one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputFrame {
    pub pointer: PointerState,
    pub viewport: Viewport,
}

/// Polled once per frame by the scheduler.
pub trait InputSource {
    fn poll(&mut self) -> InputFrame;
}

/// Accumulates window events between frames.
#[derive(Debug, Clone, Default)]
pub struct PointerTracker {
    size: (u32, u32),
    cursor: Option<(f64, f64)>,
    viewport: Viewport,
    clicks: VecDeque<PointerState>,
}

impl PointerTracker {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            ..Self::default()
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    pub fn cursor_moved(&mut self, px: f64, py: f64) {
        self.cursor = Some((px, py));
    }

    /// Pointer leaving the window keeps its last position.
    pub fn cursor_left(&mut self) {
        tracing::trace!("cursor left window");
    }

    pub fn clicked(&mut self) {
        let p = self.pointer();
        self.clicks.push_back(p);
    }

    /// Clicks recorded since the last call.
    pub fn take_clicks(&mut self) -> Vec<PointerState> {
        self.clicks.drain(..).collect()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn pointer(&self) -> PointerState {
        match self.cursor {
            Some((x, y)) => PointerState::from_window(x, y, self.size.0, self.size.1),
            None => PointerState::default(),
        }
    }
}

impl InputSource for PointerTracker {
    fn poll(&mut self) -> InputFrame {
        InputFrame {
            pointer: self.pointer(),
            viewport: self.viewport,
        }
    }
}

/// Replays a fixed list of pointer positions, holding the last one.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    frames: Vec<PointerState>,
    viewport: Viewport,
    cursor: usize,
}

impl ScriptedInput {
    pub fn new(frames: Vec<PointerState>, viewport: Viewport) -> Self {
        Self {
            frames,
            viewport,
            cursor: 0,
        }
    }

    /// A pointer that never moves.
    pub fn still(pointer: PointerState, viewport: Viewport) -> Self {
        Self::new(vec![pointer], viewport)
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> InputFrame {
        let pointer = self
            .frames
            .get(self.cursor)
            .or_else(|| self.frames.last())
            .copied()
            .unwrap_or_default();
        self.cursor = self.cursor.saturating_add(1);
        InputFrame {
            pointer,
            viewport: self.viewport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_clamps() {
        let p = PointerState::new(3.0, -7.0);
        assert_eq!(p, PointerState { x: 1.0, y: -1.0 });
        assert_eq!(PointerState::new(f32::NAN, 0.5).x, 0.0);
    }

    #[test]
    fn window_center_is_origin() {
        let p = PointerState::from_window(640.0, 360.0, 1280, 720);
        assert!(p.x.abs() < 1e-6 && p.y.abs() < 1e-6);

        let top_left = PointerState::from_window(0.0, 0.0, 1280, 720);
        assert_eq!(top_left, PointerState { x: -1.0, y: 1.0 });
    }

    #[test]
    fn viewport_matches_frustum() {
        let v = Viewport::at_distance(90.0_f32.to_radians(), 2.0, 1.0);
        assert!((v.height - 2.0).abs() < 1e-5);
        assert!((v.width - 4.0).abs() < 1e-5);
    }

    #[test]
    fn tracker_reports_clicks_once() {
        let mut t = PointerTracker::new(100, 100);
        t.cursor_moved(100.0, 100.0);
        t.clicked();
        assert_eq!(t.take_clicks(), vec![PointerState { x: 1.0, y: -1.0 }]);
        assert!(t.take_clicks().is_empty());
    }

    #[test]
    fn scripted_input_holds_last_frame() {
        let mut s = ScriptedInput::new(
            vec![PointerState::new(0.1, 0.0), PointerState::new(0.2, 0.0)],
            Viewport::default(),
        );
        assert_eq!(s.poll().pointer.x, 0.1);
        assert_eq!(s.poll().pointer.x, 0.2);
        assert_eq!(s.poll().pointer.x, 0.2);
    }
}
