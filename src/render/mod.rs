pub mod frame;
pub mod pipeline;
pub mod raster;
pub mod ticker;

use anyhow::Result;

use crate::spectrum::SpectrumFrame;

pub use frame::GpuSurface;
pub use raster::PixelSurface;
pub use ticker::{FrameTiming, Ticker};

/// Axis-aligned rectangle in normalized viewport coordinates, origin at the
/// bottom left, `[0,1]x[0,1]` covering the whole drawable area.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BarRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// Something the render loop can draw bars onto.
pub trait Surface {
    /// Recompute the projection so `[0,1]x[0,1]` maps to `width`x`height`.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    fn clear(&mut self);
    fn fill_rect(&mut self, rect: BarRect);
    fn present(&mut self) -> Result<()>;

    /// Flush and close whatever presented frames are written to.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        (**self).resize(width, height)
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn fill_rect(&mut self, rect: BarRect) {
        (**self).fill_rect(rect)
    }

    fn present(&mut self) -> Result<()> {
        (**self).present()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Size of the drawing surface in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Pixel-space rectangle, rows counted from the top. `x1`/`y1` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Map a normalized rectangle to pixels. Edges are rounded the same way
    /// for every bar, so neighbours share a boundary without gaps.
    pub fn project(&self, rect: BarRect) -> PixelRect {
        let col = |x: f32| (x.clamp(0.0, 1.0) * self.width as f32).round() as u32;
        let row = |y: f32| ((1.0 - y.clamp(0.0, 1.0)) * self.height as f32).round() as u32;
        PixelRect {
            x0: col(rect.x0),
            x1: col(rect.x1),
            y0: row(rect.y1),
            y1: row(rect.y0),
        }
    }
}

/// One rectangle per bin, left to right, each `1 / bins` wide and as tall as
/// the bin's amplitude.
pub fn bar_rects(frame: &SpectrumFrame) -> impl Iterator<Item = BarRect> + '_ {
    let width = frame.bar_width();
    frame.amplitudes().iter().enumerate().map(move |(i, &amplitude)| BarRect {
        x0: i as f32 * width,
        y0: 0.0,
        x1: (i + 1) as f32 * width,
        y1: amplitude,
    })
}

/// Clear, draw every bar of `frame` and present.
pub fn draw_frame<S: Surface + ?Sized>(surface: &mut S, frame: &SpectrumFrame) -> Result<()> {
    surface.clear();
    for rect in bar_rects(frame) {
        surface.fill_rect(rect);
    }
    surface.present()
}

pub fn rgba(rgb: [u8; 3]) -> [u8; 4] {
    [rgb[0], rgb[1], rgb[2], 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_tile_the_unit_width() {
        let frame = SpectrumFrame::normalized([0.5, 1.0, 0.0, 0.25], 1.0);
        let rects: Vec<BarRect> = bar_rects(&frame).collect();
        assert_eq!(rects.len(), 4);
        assert_eq!(rects[0], BarRect { x0: 0.0, y0: 0.0, x1: 0.25, y1: 0.5 });
        assert_eq!(rects[3].x1, 1.0);
        for pair in rects.windows(2) {
            assert_eq!(pair[0].x1, pair[1].x0);
        }
        assert_eq!(rects[2].y1, 0.0);
    }

    #[test]
    fn projection_flips_y() {
        let vp = Viewport::new(200, 100);
        let px = vp.project(BarRect { x0: 0.25, y0: 0.0, x1: 0.5, y1: 0.5 });
        assert_eq!(px, PixelRect { x0: 50, x1: 100, y0: 50, y1: 100 });

        let full = vp.project(BarRect { x0: 0.0, y0: 0.0, x1: 1.0, y1: 1.0 });
        assert_eq!(full, PixelRect { x0: 0, x1: 200, y0: 0, y1: 100 });
    }
}
