/// One decoded spectrum snapshot: a normalized amplitude per frequency bin.
///
/// Every value is in `[0.0, 1.0]`. Frames are never mutated after
/// construction; a new frame replaces the old one wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumFrame {
    amplitudes: Vec<f32>,
}

impl SpectrumFrame {
    /// Divide each raw magnitude by `normalization_constant` and clamp into the unit range.
    pub fn normalized<I>(raw: I, normalization_constant: f32) -> Self
    where
        I: IntoIterator<Item = f32>,
    {
        let amplitudes = raw
            .into_iter()
            .map(|v| clamp_unit(v / normalization_constant))
            .collect();
        Self { amplitudes }
    }

    pub fn amplitudes(&self) -> &[f32] {
        &self.amplitudes
    }

    /// Number of bins (bars).
    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    /// Width of one bar in normalized viewport units.
    pub fn bar_width(&self) -> f32 {
        if self.amplitudes.is_empty() {
            0.0
        } else {
            1.0 / self.amplitudes.len() as f32
        }
    }
}

pub fn clamp_unit(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_clamps() {
        let frame = SpectrumFrame::normalized([100.0, 200.0, 300.0, 50_000.0, -5.0], 40_000.0);
        let expected = [0.0025, 0.005, 0.0075, 1.0, 0.0];
        assert_eq!(frame.len(), expected.len());
        for (got, want) in frame.amplitudes().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn clamping_is_idempotent() {
        for v in [-1e9f32, -1.0, 0.0, 0.3, 1.0, 2.5, f32::INFINITY, f32::NEG_INFINITY] {
            let once = clamp_unit(v);
            assert_eq!(clamp_unit(once), once);
            assert!((0.0..=1.0).contains(&once));
        }
    }

    #[test]
    fn bar_width_follows_bin_count() {
        let frame = SpectrumFrame::normalized([1.0; 8], 1.0);
        assert_eq!(frame.bar_width(), 0.125);
        assert_eq!(SpectrumFrame::normalized([], 1.0).bar_width(), 0.0);
    }
}
