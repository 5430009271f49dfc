/// Pixel access seam: the contract an image backend must satisfy, plus an
/// in-memory implementation.

use anyhow::{bail, ensure, Result};
use ndarray::{Array4, ArrayD, ArrayViewD, Axis, Ix4, Slice};

use crate::error::MaskError;
use crate::stats::median_abs_dev;

/// Summary statistics over (optionally masked) pixels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridStatistics {
    /// Number of finite pixels included.
    pub npts: usize,
    pub min: f32,
    pub max: f32,
    pub sum: f64,
    pub mean: f64,
    /// Root mean square (not the standard deviation).
    pub rms: f64,
    /// Only present for robust statistics.
    pub median: Option<f32>,
    /// Median absolute deviation from the median; robust statistics only.
    pub medabsdevmed: Option<f32>,
}

/// Read/write access to an N-dimensional image.
///
/// Corners are inclusive (`trc` is the last pixel of the chunk), matching the
/// convention of the imaging tools these grids come from.
pub trait PixelSource {
    fn shape(&self) -> Vec<usize>;

    fn get_chunk(&self, blc: &[usize], trc: &[usize]) -> Result<ArrayD<f32>>;

    fn put_chunk(&mut self, blc: &[usize], pixels: ArrayViewD<'_, f32>) -> Result<()>;

    /// Statistics over pixels where `mask` is true (all pixels if `None`).
    fn statistics(&self, mask: Option<ArrayViewD<'_, bool>>, robust: bool) -> Result<GridStatistics>;

    /// Whole grid as one chunk.
    fn get_all(&self) -> Result<ArrayD<f32>> {
        let shape = self.shape();
        ensure!(shape.iter().all(|&n| n > 0), "grid has a zero-sized axis: {:?}", shape);
        let blc = vec![0; shape.len()];
        let trc: Vec<usize> = shape.iter().map(|&n| n - 1).collect();
        self.get_chunk(&blc, &trc)
    }
}

/// Grid held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryGrid {
    data: ArrayD<f32>,
}

impl MemoryGrid {
    pub fn new(data: ArrayD<f32>) -> Self {
        MemoryGrid { data }
    }

    /// Zero-filled grid with the same shape as `template`.
    pub fn from_template(template: &dyn PixelSource) -> Self {
        MemoryGrid {
            data: ArrayD::zeros(template.shape()),
        }
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn into_inner(self) -> ArrayD<f32> {
        self.data
    }

    fn check_corners(&self, blc: &[usize], trc: &[usize]) -> Result<()> {
        let ndim = self.data.ndim();
        ensure!(
            blc.len() == ndim && trc.len() == ndim,
            "corner rank mismatch: blc {:?}, trc {:?}, grid rank {}",
            blc,
            trc,
            ndim
        );
        for (axis, ((&lo, &hi), &len)) in blc.iter().zip(trc).zip(self.data.shape()).enumerate() {
            if lo > hi || hi >= len {
                bail!("chunk [{}, {}] out of range on axis {} (len {})", lo, hi, axis, len);
            }
        }
        Ok(())
    }
}

impl PixelSource for MemoryGrid {
    fn shape(&self) -> Vec<usize> {
        self.data.shape().to_vec()
    }

    fn get_chunk(&self, blc: &[usize], trc: &[usize]) -> Result<ArrayD<f32>> {
        self.check_corners(blc, trc)?;
        let view = self
            .data
            .slice_each_axis(|ax| Slice::from(blc[ax.axis.index()]..trc[ax.axis.index()] + 1));
        Ok(view.to_owned())
    }

    fn put_chunk(&mut self, blc: &[usize], pixels: ArrayViewD<'_, f32>) -> Result<()> {
        ensure!(
            pixels.ndim() == self.data.ndim(),
            "chunk rank {} does not match grid rank {}",
            pixels.ndim(),
            self.data.ndim()
        );
        ensure!(
            pixels.shape().iter().all(|&n| n > 0),
            "cannot write an empty chunk"
        );
        let trc: Vec<usize> = blc
            .iter()
            .zip(pixels.shape())
            .map(|(&lo, &n)| lo + n - 1)
            .collect();
        self.check_corners(blc, &trc)?;
        self.data
            .slice_each_axis_mut(|ax| Slice::from(blc[ax.axis.index()]..trc[ax.axis.index()] + 1))
            .assign(&pixels);
        Ok(())
    }

    fn statistics(&self, mask: Option<ArrayViewD<'_, bool>>, robust: bool) -> Result<GridStatistics> {
        if let Some(m) = &mask {
            ensure!(
                m.shape() == self.data.shape(),
                "statistics mask shape {:?} does not match grid {:?}",
                m.shape(),
                self.data.shape()
            );
        }

        let mut stats = GridStatistics {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            ..GridStatistics::default()
        };
        let mut sum_sq = 0.0_f64;
        let mut samples = Vec::new();

        let mut accumulate = |v: f32| {
            if !v.is_finite() {
                return;
            }
            stats.npts += 1;
            stats.min = stats.min.min(v);
            stats.max = stats.max.max(v);
            stats.sum += v as f64;
            sum_sq += (v as f64) * (v as f64);
            if robust {
                samples.push(v);
            }
        };

        match &mask {
            Some(m) => self
                .data
                .iter()
                .zip(m.iter())
                .filter(|(_, &keep)| keep)
                .for_each(|(&v, _)| accumulate(v)),
            None => self.data.iter().for_each(|&v| accumulate(v)),
        }

        if stats.npts == 0 {
            return Ok(GridStatistics::default());
        }

        let n = stats.npts as f64;
        stats.mean = stats.sum / n;
        stats.rms = (sum_sq / n).sqrt();
        if robust {
            let (median, mad) = median_abs_dev(&mut samples);
            stats.median = Some(median);
            stats.medabsdevmed = Some(mad);
        }
        Ok(stats)
    }
}

/// Promote a grid to the (x, y, polarization, channel) layout.
///
/// Rank 2 is read as (x, y), rank 3 as (x, y, channel), rank 4 as-is.
pub fn as_cube(grid: ArrayD<f32>) -> Result<Array4<f32>, MaskError> {
    if grid.shape().iter().any(|&n| n == 0) {
        return Err(MaskError::DataShape(format!(
            "zero-sized axis in grid of shape {:?}",
            grid.shape()
        )));
    }
    let grid = match grid.ndim() {
        2 => grid.insert_axis(Axis(2)).insert_axis(Axis(3)),
        3 => grid.insert_axis(Axis(2)),
        4 => grid,
        n => {
            return Err(MaskError::DataShape(format!(
                "expected a rank 2, 3 or 4 grid, got rank {}",
                n
            )))
        }
    };
    grid.into_dimensionality::<Ix4>()
        .map_err(|e| MaskError::DataShape(e.to_string()))
}
