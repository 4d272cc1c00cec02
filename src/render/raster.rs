use anyhow::{ensure, Result};

use super::{rgba, BarRect, Surface, Viewport};
use crate::encode::FrameOutput;

/// CPU RGBA framebuffer. Presented frames go to an optional [`FrameOutput`].
pub struct PixelSurface {
    viewport: Viewport,
    pixels: Vec<u8>,
    bar_color: [u8; 4],
    background: [u8; 4],
    output: Option<Box<dyn FrameOutput>>,
    presented: u64,
}

impl PixelSurface {
    pub fn new(width: u32, height: u32, bar_color: [u8; 3], background: [u8; 3]) -> Self {
        let background = rgba(background);
        Self {
            viewport: Viewport::new(width, height),
            pixels: filled(width, height, background),
            bar_color: rgba(bar_color),
            background,
            output: None,
            presented: 0,
        }
    }

    pub fn with_output(mut self, output: Box<dyn FrameOutput>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at column `x`, row `y` (row 0 is the top).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.viewport.width || y >= self.viewport.height {
            return None;
        }
        let idx = ((y * self.viewport.width + x) * 4) as usize;
        let px = self.pixels.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Number of frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Surface for PixelSurface {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        ensure!(width > 0 && height > 0, "Surface size must be non-zero, got {}x{}", width, height);
        self.viewport = Viewport::new(width, height);
        self.pixels = filled(width, height, self.background);
        Ok(())
    }

    fn clear(&mut self) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&self.background);
        }
    }

    fn fill_rect(&mut self, rect: BarRect) {
        let px = self.viewport.project(rect);
        let width = self.viewport.width as usize;
        for y in px.y0..px.y1.min(self.viewport.height) {
            let row = y as usize * width;
            for x in px.x0..px.x1.min(self.viewport.width) {
                let idx = (row + x as usize) * 4;
                self.pixels[idx..idx + 4].copy_from_slice(&self.bar_color);
            }
        }
    }

    fn present(&mut self) -> Result<()> {
        self.presented += 1;
        if let Some(output) = self.output.as_mut() {
            output.write_frame(&self.pixels, self.viewport.width, self.viewport.height)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        match self.output.as_mut() {
            Some(output) => output.finish(),
            None => Ok(()),
        }
    }
}

fn filled(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    color.repeat((width * height) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::draw_frame;
    use crate::spectrum::SpectrumFrame;
    use std::sync::{Arc, Mutex};

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn surface(width: u32, height: u32) -> PixelSurface {
        PixelSurface::new(width, height, [255, 0, 0], [0, 0, 0])
    }

    #[test]
    fn draws_bars_from_the_bottom() {
        let mut s = surface(4, 4);
        let frame = SpectrumFrame::normalized([1.0, 0.5, 0.0, 0.25], 1.0);
        draw_frame(&mut s, &frame).unwrap();

        // column 0 full height
        for y in 0..4 {
            assert_eq!(s.pixel(0, y), Some(RED));
        }
        // column 1 bottom half
        assert_eq!(s.pixel(1, 1), Some(BLACK));
        assert_eq!(s.pixel(1, 2), Some(RED));
        assert_eq!(s.pixel(1, 3), Some(RED));
        // column 2 empty
        for y in 0..4 {
            assert_eq!(s.pixel(2, y), Some(BLACK));
        }
        // column 3 bottom row
        assert_eq!(s.pixel(3, 2), Some(BLACK));
        assert_eq!(s.pixel(3, 3), Some(RED));
        assert_eq!(s.presented(), 1);
    }

    #[test]
    fn clear_removes_previous_bars() {
        let mut s = surface(2, 2);
        draw_frame(&mut s, &SpectrumFrame::normalized([1.0, 1.0], 1.0)).unwrap();
        draw_frame(&mut s, &SpectrumFrame::normalized([0.0, 0.0], 1.0)).unwrap();
        assert!(s.pixels().chunks_exact(4).all(|px| px == BLACK));
    }

    #[test]
    fn resize_maps_unit_square_to_new_size() {
        let mut s = surface(4, 4);
        s.resize(8, 2).unwrap();
        draw_frame(&mut s, &SpectrumFrame::normalized([1.0, 1.0], 1.0)).unwrap();
        assert_eq!(s.viewport(), Viewport::new(8, 2));
        assert_eq!(s.pixels().len(), 8 * 2 * 4);
        assert!(s.pixels().chunks_exact(4).all(|px| px == RED));
        assert!(s.resize(0, 10).is_err());
    }

    struct Captured(Arc<Mutex<Vec<(u32, u32, usize)>>>);

    impl FrameOutput for Captured {
        fn write_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<()> {
            self.0.lock().unwrap().push((width, height, rgba.len()));
            Ok(())
        }
    }

    #[test]
    fn presented_frames_reach_output() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let mut s = surface(3, 2).with_output(Box::new(Captured(Arc::clone(&frames))));
        draw_frame(&mut s, &SpectrumFrame::normalized([0.5], 1.0)).unwrap();
        draw_frame(&mut s, &SpectrumFrame::normalized([0.7], 1.0)).unwrap();
        s.finish().unwrap();
        assert_eq!(*frames.lock().unwrap(), vec![(3, 2, 24), (3, 2, 24)]);
    }
}
