/// PSF sidelobe ratio: how bright the first sidelobe is relative to the main lobe.

use ndarray::{s, ArrayView4};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::flood::IslandSearch;
use crate::error::MaskError;
use crate::types::Connectivity;

/// Ratio reported when the PSF does not show two separate lobes.
pub const DEFAULT_SIDELOBE_RATIO: f32 = 0.5;

/// Upper bound on the reported ratio; larger values make the masking gate so
/// high that cleaning converges very slowly.
pub const MAX_SIDELOBE_RATIO: f32 = 0.7;

/// Tuning for the sidelobe search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidelobeParams {
    /// PSF pixels above this fraction of the peak take part in the search.
    pub island_threshold: f32,
    /// Islands whose peak falls below this absolute value end the search.
    pub peak_threshold: f32,
}

impl Default for SidelobeParams {
    fn default() -> Self {
        SidelobeParams {
            island_threshold: 0.1,
            peak_threshold: 0.0,
        }
    }
}

impl SidelobeParams {
    pub fn validate(&self) -> Result<(), MaskError> {
        if !(self.island_threshold > 0.0 && self.island_threshold < 1.0) {
            return Err(MaskError::config(
                "island_threshold",
                format!("must lie in (0, 1), got {}", self.island_threshold),
            ));
        }
        if !self.peak_threshold.is_finite() || self.peak_threshold < 0.0 {
            return Err(MaskError::config(
                "peak_threshold",
                format!("must be finite and >= 0, got {}", self.peak_threshold),
            ));
        }
        Ok(())
    }
}

/// Result of a sidelobe estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SidelobeEstimate {
    /// Ratio to use for gating, after clamping or fallback.
    pub ratio: f32,
    pub main_peak: Option<f32>,
    pub sidelobe_peak: Option<f32>,
    /// The measured ratio exceeded `MAX_SIDELOBE_RATIO`.
    pub clamped: bool,
    /// Fewer than two lobes were found; `ratio` is `DEFAULT_SIDELOBE_RATIO`.
    pub fallback: bool,
}

/// Estimate the sidelobe ratio from the central channel of a PSF cube.
///
/// Edge channels are ignored since their PSFs are the least reliable. Only
/// polarization 0 is examined.
pub fn estimate_sidelobe_ratio(
    psf: ArrayView4<'_, f32>,
    params: &SidelobeParams,
) -> Result<SidelobeEstimate, MaskError> {
    params.validate()?;

    let (nx, ny, npol, nchan) = psf.dim();
    if nx == 0 || ny == 0 || npol == 0 || nchan == 0 {
        return Err(MaskError::DataShape(format!(
            "PSF has a zero-sized axis: {:?}",
            psf.shape()
        )));
    }

    let chan = nchan / 2;
    let plane = psf.slice(s![.., .., 0..1, chan..chan + 1]);

    let peak = plane
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !(peak > 0.0) {
        return Err(MaskError::DataShape(format!(
            "PSF channel {} has no positive peak",
            chan
        )));
    }

    let level = params.island_threshold * peak;
    let search = IslandSearch::new(plane.mapv(|v| v > level), plane, Connectivity::Planar)?;

    let mut lobes = Vec::with_capacity(2);
    for island in search {
        if island.peak < params.peak_threshold {
            break;
        }
        debug!(peak = island.peak, pixels = island.len(), "PSF lobe");
        lobes.push(island.peak);
        if lobes.len() == 2 {
            break;
        }
    }

    if lobes.len() < 2 {
        warn!(
            lobes = lobes.len(),
            ratio = DEFAULT_SIDELOBE_RATIO,
            "PSF sidelobe not found, using default ratio"
        );
        return Ok(SidelobeEstimate {
            ratio: DEFAULT_SIDELOBE_RATIO,
            main_peak: lobes.first().copied(),
            sidelobe_peak: None,
            clamped: false,
            fallback: true,
        });
    }

    let raw = lobes[1] / lobes[0];
    let clamped = raw > MAX_SIDELOBE_RATIO;
    let ratio = raw.min(MAX_SIDELOBE_RATIO);
    debug!(raw, ratio, clamped, "PSF sidelobe ratio");

    Ok(SidelobeEstimate {
        ratio,
        main_peak: Some(lobes[0]),
        sidelobe_peak: Some(lobes[1]),
        clamped,
        fallback: false,
    })
}
