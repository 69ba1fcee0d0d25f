//!
//! # Draw-List Interface
//!
//! The boundary between the rendering core and whatever actually rasters
//! pixels. The core emits batched filled polygons, strokes, and the
//! handful of overlay text labels (scale bar, coordinate readout, metrics)
//! into this trait, in screen coordinates (pixels, Y-down), front-to-back
//! in document order. Hosts tessellate or paint however they like.
//!

// Local imports
use gdscope_model::Color;

/// A point in screen space, pixels, Y-down
pub type ScreenPoint = [f64; 2];

/// Sink for one frame's draw primitives, consumed in submission order
pub trait DrawList {
    /// A closed filled polygon; the outline closes back to the first point
    fn fill_polygon(&mut self, points: &[ScreenPoint], color: Color, alpha: f32);
    /// A stroked line segment
    fn stroke_line(&mut self, a: ScreenPoint, b: ScreenPoint, color: Color, alpha: f32, width: f32);
    /// A stroked (unfilled) rectangle
    fn stroke_rect(&mut self, min: ScreenPoint, max: ScreenPoint, color: Color, alpha: f32, width: f32);
    /// A short overlay label anchored at `pos`
    fn text(&mut self, pos: ScreenPoint, text: &str, color: Color);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every primitive for assertions
    #[derive(Default)]
    pub struct Recorder {
        pub polygons: Vec<(Vec<ScreenPoint>, Color, f32)>,
        pub lines: Vec<(ScreenPoint, ScreenPoint, f32)>,
        pub rects: Vec<(ScreenPoint, ScreenPoint, Color)>,
        pub texts: Vec<(ScreenPoint, String)>,
    }
    impl DrawList for Recorder {
        fn fill_polygon(&mut self, points: &[ScreenPoint], color: Color, alpha: f32) {
            self.polygons.push((points.to_vec(), color, alpha));
        }
        fn stroke_line(
            &mut self,
            a: ScreenPoint,
            b: ScreenPoint,
            _color: Color,
            alpha: f32,
            _width: f32,
        ) {
            self.lines.push((a, b, alpha));
        }
        fn stroke_rect(
            &mut self,
            min: ScreenPoint,
            max: ScreenPoint,
            color: Color,
            _alpha: f32,
            _width: f32,
        ) {
            self.rects.push((min, max, color));
        }
        fn text(&mut self, pos: ScreenPoint, text: &str, _color: Color) {
            self.texts.push((pos, text.to_string()));
        }
    }
}
