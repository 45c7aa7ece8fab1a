use gridlight_common::Color;

/// Pointer interaction flags for an interactive instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interaction {
    pub hovered: bool,
    pub clicked: bool,
}

impl Interaction {
    /// Multiplier applied to the instance's base scale.
    pub fn scale_factor(&self) -> f32 {
        if self.clicked { 0.5 } else { 0.8 }
    }

    pub fn tint(&self) -> Color {
        if self.hovered {
            Color::red()
        } else {
            Color::indian_red()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_shrinks() {
        let mut i = Interaction::default();
        assert_eq!(i.scale_factor(), 0.8);
        i.clicked = true;
        assert_eq!(i.scale_factor(), 0.5);
    }

    #[test]
    fn hover_tints_red() {
        let mut i = Interaction::default();
        assert_eq!(i.tint(), Color::indian_red());
        i.hovered = true;
        assert_eq!(i.tint(), Color::red());
    }
}
