/// Island finding: seeded flood fill over a boolean search mask.

use std::cmp::Ordering;

use ndarray::{Array4, ArrayView4, ArrayViewMut4};

use crate::error::MaskError;
use crate::types::{Connectivity, Coord, Island};

/// Extract the island containing the brightest still-masked pixel.
///
/// Returns `Ok(None)` once the mask holds no true pixel. Every pixel added to
/// the island is cleared in `mask`, so repeated calls partition the initial
/// mask into disjoint islands.
///
/// The seed is the masked pixel of maximum amplitude; on ties the first one in
/// logical (row-major) index order wins. NaN amplitudes never win over a number.
pub fn find_island(
    mask: ArrayViewMut4<'_, bool>,
    amplitude: ArrayView4<'_, f32>,
    connectivity: Connectivity,
) -> Result<Option<Island>, MaskError> {
    if mask.shape() != amplitude.shape() {
        return Err(MaskError::DataShape(format!(
            "search mask {:?} and amplitude grid {:?} differ in shape",
            mask.shape(),
            amplitude.shape()
        )));
    }

    // Seed: brightest masked pixel
    let mut seed: Option<((usize, usize, usize, usize), f32)> = None;
    for (idx, &m) in mask.indexed_iter() {
        if !m {
            continue;
        }
        let a = amplitude[idx];
        seed = match seed {
            None => Some((idx, a)),
            Some((_, best)) if a > best || (best.is_nan() && !a.is_nan()) => Some((idx, a)),
            keep => keep,
        };
    }

    let Some(((x, y, pol, chan), peak)) = seed else {
        return Ok(None);
    };

    let peak_coord = Coord::new(x, y, pol, chan);
    let pixels = grow(mask, peak_coord, connectivity);
    Ok(Some(Island {
        peak,
        peak_coord,
        pixels,
    }))
}

/// Repeated island extraction over one owned search mask.
///
/// Yields the same islands in the same order as calling [`find_island`] until
/// it returns `None`, but sorts the candidate seeds once up front instead of
/// rescanning the grid for every island. Noisy grids with many single-pixel
/// spikes stay linear after the sort.
pub struct IslandSearch<'a> {
    mask: Array4<bool>,
    amplitude: ArrayView4<'a, f32>,
    connectivity: Connectivity,
    /// Masked pixels, brightest first; ties in row-major order, NaN last.
    seeds: Vec<Coord>,
    next_seed: usize,
}

impl<'a> IslandSearch<'a> {
    pub fn new(
        mask: Array4<bool>,
        amplitude: ArrayView4<'a, f32>,
        connectivity: Connectivity,
    ) -> Result<Self, MaskError> {
        if mask.shape() != amplitude.shape() {
            return Err(MaskError::DataShape(format!(
                "search mask {:?} and amplitude grid {:?} differ in shape",
                mask.shape(),
                amplitude.shape()
            )));
        }

        let mut seeds: Vec<Coord> = mask
            .indexed_iter()
            .filter(|(_, &m)| m)
            .map(|((x, y, pol, chan), _)| Coord::new(x, y, pol, chan))
            .collect();
        // Stable sort keeps row-major order among equal amplitudes
        seeds.sort_by(|a, b| {
            let (va, vb) = (amplitude[a.index()], amplitude[b.index()]);
            va.is_nan()
                .cmp(&vb.is_nan())
                .then_with(|| vb.partial_cmp(&va).unwrap_or(Ordering::Equal))
        });

        Ok(IslandSearch {
            mask,
            amplitude,
            connectivity,
            seeds,
            next_seed: 0,
        })
    }

    /// Pixels not yet claimed by any island.
    pub fn remaining(&self) -> &Array4<bool> {
        &self.mask
    }
}

impl Iterator for IslandSearch<'_> {
    type Item = Island;

    fn next(&mut self) -> Option<Island> {
        while let Some(&seed) = self.seeds.get(self.next_seed) {
            self.next_seed += 1;
            if !self.mask[seed.index()] {
                continue;
            }
            let pixels = grow(self.mask.view_mut(), seed, self.connectivity);
            return Some(Island {
                peak: self.amplitude[seed.index()],
                peak_coord: seed,
                pixels,
            });
        }
        None
    }
}

/// Flood-fill from `seed`, clearing every claimed pixel in `mask`.
fn grow(mut mask: ArrayViewMut4<'_, bool>, seed: Coord, connectivity: Connectivity) -> Vec<Coord> {
    let dims = mask.dim();
    mask[seed.index()] = false;

    // The pixel list doubles as the worklist; `cursor` marks the next pixel to expand.
    let mut pixels = vec![seed];
    let mut cursor = 0;
    while cursor < pixels.len() {
        let current = pixels[cursor];
        cursor += 1;
        for n in neighbours(current, dims, connectivity).into_iter().flatten() {
            let cell = &mut mask[n.index()];
            if *cell {
                *cell = false;
                pixels.push(n);
            }
        }
    }
    pixels
}

/// Face neighbours of `c`, clamped at the grid edges.
fn neighbours(
    c: Coord,
    (nx, ny, _, nchan): (usize, usize, usize, usize),
    connectivity: Connectivity,
) -> [Option<Coord>; 6] {
    let step = |x: usize, y: usize, chan: usize| Some(Coord::new(x, y, c.pol, chan));
    let spectral = connectivity == Connectivity::Cube;
    [
        if c.x > 0 { step(c.x - 1, c.y, c.chan) } else { None },
        if c.x + 1 < nx { step(c.x + 1, c.y, c.chan) } else { None },
        if c.y > 0 { step(c.x, c.y - 1, c.chan) } else { None },
        if c.y + 1 < ny { step(c.x, c.y + 1, c.chan) } else { None },
        if spectral && c.chan > 0 { step(c.x, c.y, c.chan - 1) } else { None },
        if spectral && c.chan + 1 < nchan { step(c.x, c.y, c.chan + 1) } else { None },
    ]
}
