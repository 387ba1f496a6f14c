use crate::render::backend::{PixelBuffer, SurfaceSize};
use crate::render::backends::cpu::blend_over;
use crate::render::Viewport;

const CHECKER_LIGHT: [u8; 4] = [204, 204, 204, 255];
const CHECKER_DARK: [u8; 4] = [153, 153, 153, 255];

/// Where the canvas is drawn inside the viewport, relative to the viewport origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Letterbox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Canvas pixel to viewport pixel ratio
    pub factor: f64,
}

impl Letterbox {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Fit `canvas` into `viewport` preserving its aspect ratio, centered.
pub fn fit_canvas(canvas: SurfaceSize, viewport: Viewport) -> Letterbox {
    if canvas.width == 0 || canvas.height == 0 {
        return Letterbox::default();
    }

    let vw = viewport.width as f64;
    let vh = viewport.height as f64;
    let factor = (vw / canvas.width as f64).min(vh / canvas.height as f64);
    let width = canvas.width as f64 * factor;
    let height = canvas.height as f64 * factor;

    Letterbox {
        x: (vw - width) / 2.0,
        y: (vh - height) / 2.0,
        width,
        height,
        factor,
    }
}

/// Maps the fixed-size canvas into the current viewport.
#[derive(Debug, Clone)]
pub struct CanvasPresenter {
    viewport: Viewport,
    canvas: SurfaceSize,
    letterbox: Letterbox,
    checker_cell: u32,
}

impl CanvasPresenter {
    pub fn new(viewport: Viewport, canvas: SurfaceSize, checker_cell: u32) -> Self {
        Self {
            viewport,
            canvas,
            letterbox: fit_canvas(canvas, viewport),
            checker_cell: checker_cell.max(1),
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn letterbox(&self) -> Letterbox {
        self.letterbox
    }

    /// Returns true when the size changed and a relayout is due.
    pub fn set_viewport_size(&mut self, width: u32, height: u32) -> bool {
        if self.viewport.width == width && self.viewport.height == height {
            return false;
        }
        self.viewport.resize(width, height);
        true
    }

    pub fn set_canvas_size(&mut self, canvas: SurfaceSize) {
        self.canvas = canvas;
    }

    pub fn relayout(&mut self) -> Letterbox {
        self.letterbox = fit_canvas(self.canvas, self.viewport);
        log::debug!(
            "Presenter: canvas {} in {:?} at factor {:.3}",
            self.canvas,
            self.viewport,
            self.letterbox.factor
        );
        self.letterbox
    }

    /// Rasterize the full viewport: a checkerboard with the canvas scaled nearest-neighbour
    /// into the letterbox and blended over it.
    pub fn compose_viewport(&self, canvas: &PixelBuffer) -> PixelBuffer {
        let mut out = PixelBuffer::transparent(self.viewport.width, self.viewport.height);
        let lb = self.letterbox;
        let cell = self.checker_cell;

        for y in 0..out.height {
            for x in 0..out.width {
                let offset = y as usize * out.stride as usize + x as usize * 4;
                let dst = &mut out.pixels[offset..offset + 4];

                let checker = if ((x / cell) + (y / cell)) % 2 == 0 {
                    CHECKER_LIGHT
                } else {
                    CHECKER_DARK
                };
                dst.copy_from_slice(&checker);

                let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
                if lb.factor <= 0.0 || !lb.contains(px, py) {
                    continue;
                }
                let cx = (((px - lb.x) / lb.factor) as u32).min(canvas.width.saturating_sub(1));
                let cy = (((py - lb.y) / lb.factor) as u32).min(canvas.height.saturating_sub(1));
                if let Some(src) = canvas.pixel(cx, cy) {
                    blend_over(dst, src);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_viewport_pillarboxes() {
        let lb = fit_canvas(SurfaceSize::new(640, 480), Viewport::new(0, 0, 1280, 480));
        assert_eq!(lb.factor, 1.0);
        assert_eq!((lb.x, lb.y), (320.0, 0.0));
        assert_eq!((lb.width, lb.height), (640.0, 480.0));
    }

    #[test]
    fn tall_viewport_letterboxes() {
        let lb = fit_canvas(SurfaceSize::new(640, 480), Viewport::new(0, 0, 320, 1000));
        assert_eq!(lb.factor, 0.5);
        assert_eq!((lb.x, lb.y), (0.0, 380.0));
        assert_eq!((lb.width, lb.height), (320.0, 240.0));
    }

    #[test]
    fn empty_viewport_shows_nothing() {
        let lb = fit_canvas(SurfaceSize::new(640, 480), Viewport::new(0, 0, 0, 0));
        assert_eq!(lb.width, 0.0);
        assert!(!lb.contains(0.0, 0.0));
    }

    #[test]
    fn relayout_only_after_size_change() {
        let mut p = CanvasPresenter::new(Viewport::new(0, 0, 100, 100), SurfaceSize::new(10, 10), 16);
        assert!(!p.set_viewport_size(100, 100));
        assert!(p.set_viewport_size(200, 100));
        assert_eq!(p.letterbox().factor, 10.0);
        assert_eq!(p.relayout().factor, 10.0);
        assert_eq!(p.letterbox().x, 50.0);
    }

    #[test]
    fn composed_viewport_has_checkers_and_canvas() {
        let mut canvas = PixelBuffer::transparent(2, 2);
        for px in canvas.pixels.chunks_mut(4) {
            px.copy_from_slice(&[255, 0, 0, 255]);
        }
        let p = CanvasPresenter::new(Viewport::new(0, 0, 8, 4), SurfaceSize::new(2, 2), 2);

        let out = p.compose_viewport(&canvas);
        assert_eq!((out.width, out.height), (8, 4));
        assert_eq!(out.pixel(0, 0), Some(CHECKER_LIGHT));
        assert_eq!(out.pixel(0, 2), Some(CHECKER_DARK));
        assert_eq!(out.pixel(6, 0), Some(CHECKER_DARK));
        assert_eq!(out.pixel(2, 2), Some([255, 0, 0, 255]));
        assert_eq!(out.pixel(5, 3), Some([255, 0, 0, 255]));
        assert_eq!(out.pixel(7, 3), Some(CHECKER_LIGHT));
    }
}
