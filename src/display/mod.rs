pub mod fake;
pub mod icons;
pub mod overlays;

/// Framebuffer size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Screen {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}
