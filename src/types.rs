/// Core value types shared by the masking and convergence modules.

use serde::{Deserialize, Serialize};

/// Default maximum number of islands accepted per plane during detection.
///
/// Whatever cap detection actually ran with is recorded on each iteration, and
/// the NoisePeaksUniform stop rule treats a plane holding that many islands as
/// saturated with noise peaks.
pub const MAX_ISLANDS_PER_PLANE: usize = 30;

/// Pixel coordinate in an (x, y, polarization, channel) cube.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: usize,
    pub y: usize,
    pub pol: usize,
    pub chan: usize,
}

impl Coord {
    pub fn new(x: usize, y: usize, pol: usize, chan: usize) -> Self {
        Coord { x, y, pol, chan }
    }

    /// Index tuple usable with `ndarray` 4-D arrays.
    #[inline]
    pub fn index(&self) -> [usize; 4] {
        [self.x, self.y, self.pol, self.chan]
    }

    /// Sky position ignoring the spectral axis.
    #[inline]
    pub(crate) fn sky(&self) -> (usize, usize, usize) {
        (self.x, self.y, self.pol)
    }
}

/// A connected region of above-threshold pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Island {
    /// Amplitude at the seed pixel.
    pub peak: f32,
    /// Seed pixel (brightest masked pixel at the time of the search).
    pub peak_coord: Coord,
    /// Member pixels in flood order, starting with `peak_coord`.
    pub pixels: Vec<Coord>,
}

impl Island {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// A single unconnected pixel, typically a noise spike.
    pub fn is_isolated(&self) -> bool {
        self.pixels.len() == 1
    }
}

/// Flood-fill neighbourhood.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Connectivity {
    /// Six face neighbours: ±x, ±y, ±channel at fixed polarization.
    Cube,
    /// Four in-plane neighbours: ±x, ±y. Used for PSF analysis.
    Planar,
}

/// Which island-gating rule the catalog builder applies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    /// Spectral cube: gate on the PSF sidelobe ratio, link islands across planes.
    #[default]
    Cube,
    /// Single-field calibrator: fixed 0.5 gate, exactly one valid plane expected.
    Calibrator,
}

/// Outcome of a convergence evaluation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop,
}

impl Verdict {
    pub fn is_stop(&self) -> bool {
        matches!(self, Verdict::Stop)
    }
}
