use serde::{Deserialize, Serialize};

/// Viewport emulated for every capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    /// Viewport width in CSS pixels.
    pub width: u32,
    /// Viewport height in CSS pixels.
    pub height: u32,
    /// Device scale factor (DPR). A factor of 2 doubles the pixel size of every capture.
    pub device_scale_factor: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1200,
            device_scale_factor: 2.0,
        }
    }
}

impl Viewport {
    /// `--window-size` argument matching this viewport.
    pub(crate) fn window_size_arg(&self) -> String {
        format!("--window-size={},{}", self.width, self.height)
    }
}

/// Rectangular region, in CSS pixels, for clipping screenshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ClipRegion {
    /// Builds a clip from a CDP box-model quad (`[x1, y1, x2, y2, x3, y3, x4, y4]`).
    pub(crate) fn from_quad(quad: &serde_json::Value) -> Option<Self> {
        let p = |i: usize| quad.get(i).and_then(|v| v.as_f64());
        let (x, y) = (p(0)?, p(1)?);
        Some(Self {
            x,
            y,
            width: p(2)? - x,
            height: p(5)? - y,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clip_from_border_quad() {
        let quad = json!([140.0, 0.0, 1920.0, 0.0, 1920.0, 1055.0, 140.0, 1055.0]);
        let clip = ClipRegion::from_quad(&quad).unwrap();
        assert_eq!(clip.x, 140.0);
        assert_eq!(clip.width, 1780.0);
        assert_eq!(clip.height, 1055.0);
        assert!(!clip.is_empty());
    }

    #[test]
    fn short_quad_is_rejected() {
        assert!(ClipRegion::from_quad(&json!([1.0, 2.0])).is_none());
    }

    #[test]
    fn viewport_defaults_match_capture_settings() {
        let v = Viewport::default();
        assert_eq!((v.width, v.height), (1920, 1200));
        assert_eq!(v.device_scale_factor, 2.0);
        assert_eq!(v.window_size_arg(), "--window-size=1920,1200");
    }
}
