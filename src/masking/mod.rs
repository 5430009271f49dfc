/// Clean-mask computation: islands, clusters, thresholds.

pub mod catalog;
pub mod flood;
pub mod linker;
pub mod paint;
pub mod select;
pub mod sidelobe;
pub mod threshold;

use std::sync::Arc;

use anyhow::{Context, Result};
use ndarray::{Array4, ArrayView4, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MaskError;
use crate::session::MaskingSession;
use crate::source::{as_cube, PixelSource};
use crate::types::{MaskMode, MAX_ISLANDS_PER_PLANE};

use catalog::{CatalogParams, IslandCatalog};
use select::Cluster;
use sidelobe::{SidelobeEstimate, SidelobeParams};

/// Gate and threshold ratio used by the calibrator variant.
pub const CALIBRATOR_GATE_RATIO: f32 = 0.5;

/// Masking parameters. Deserializable so pipelines can carry them in their own
/// configuration files; missing fields take the defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Maximum number of clusters painted per call.
    pub npeak: usize,
    /// PSF pixels above this fraction of the PSF peak take part in the sidelobe search.
    pub island_threshold: f32,
    /// PSF islands below this value end the sidelobe search.
    pub peak_threshold: f32,
    pub max_islands_per_plane: usize,
    pub mode: MaskMode,
    pub polarization: usize,
}

impl Default for MaskConfig {
    fn default() -> Self {
        MaskConfig {
            npeak: 5,
            island_threshold: 0.1,
            peak_threshold: 0.0,
            max_islands_per_plane: MAX_ISLANDS_PER_PLANE,
            mode: MaskMode::Cube,
            polarization: 0,
        }
    }
}

impl MaskConfig {
    fn sidelobe_params(&self) -> SidelobeParams {
        SidelobeParams {
            island_threshold: self.island_threshold,
            peak_threshold: self.peak_threshold,
        }
    }

    pub fn validate(&self) -> Result<(), MaskError> {
        if self.npeak == 0 {
            return Err(MaskError::config("npeak", "must be at least 1"));
        }
        if self.max_islands_per_plane == 0 {
            return Err(MaskError::config("max_islands_per_plane", "must be at least 1"));
        }
        self.sidelobe_params().validate()
    }
}

/// Everything one mask computation produced.
#[derive(Clone, Debug)]
pub struct MaskResult {
    /// Cumulative mask, same shape as the residual, values 0.0 or 1.0.
    pub mask: Array4<f32>,
    /// Global cleaning threshold (max of `plane_thresholds`).
    pub threshold: f32,
    pub plane_thresholds: Vec<f32>,
    /// Ratio used for the gate and the thresholds.
    pub gate_ratio: f32,
    /// `None` in calibrator mode, where the PSF is not examined.
    pub sidelobe: Option<SidelobeEstimate>,
    pub clusters: Vec<Cluster>,
    /// Island peaks per plane, brightest first, before cluster selection.
    pub island_peaks: Vec<Vec<f32>>,
    /// Per-plane island cap the detection ran with.
    pub island_cap: usize,
}

impl MaskResult {
    pub fn island_count(&self) -> usize {
        self.island_peaks.iter().map(Vec::len).sum()
    }
}

/// Clean-mask builder.
pub struct CleanMasker {
    config: MaskConfig,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl CleanMasker {
    pub fn new() -> Self {
        Self::from_config(MaskConfig::default())
    }

    pub fn from_config(config: MaskConfig) -> Self {
        CleanMasker {
            config,
            thread_pool: None,
        }
    }

    pub fn config(&self) -> &MaskConfig {
        &self.config
    }

    /// Paint at most this many clusters per call.
    pub fn with_npeak(mut self, npeak: usize) -> Self {
        self.config.npeak = npeak;
        self
    }

    /// Fraction of the PSF peak above which PSF pixels are searched for lobes.
    pub fn with_island_threshold(mut self, fraction: f32) -> Self {
        self.config.island_threshold = fraction;
        self
    }

    /// Absolute PSF lobe peak below which the sidelobe search stops.
    pub fn with_peak_threshold(mut self, peak: f32) -> Self {
        self.config.peak_threshold = peak;
        self
    }

    pub fn with_max_islands_per_plane(mut self, cap: usize) -> Self {
        self.config.max_islands_per_plane = cap;
        self
    }

    pub fn with_mode(mut self, mode: MaskMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Polarization plane to search (0 = Stokes I for most cubes).
    pub fn with_polarization(mut self, pol: usize) -> Self {
        self.config.polarization = pol;
        self
    }

    /// Use a custom rayon thread pool for per-plane detection.
    pub fn with_thread_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    /// Compute the next cumulative mask and cleaning threshold.
    ///
    /// The session's previous mask is the starting point and the session's
    /// cached PSF sidelobe estimate is reused after the first call. The session
    /// is only updated once the whole computation has succeeded.
    pub fn compute(
        &self,
        session: &mut MaskingSession,
        residual: ArrayView4<'_, f32>,
        psf: ArrayView4<'_, f32>,
    ) -> Result<MaskResult, MaskError> {
        match &self.thread_pool {
            Some(pool) => pool.install(|| self.compute_impl(session, residual, psf)),
            None => self.compute_impl(session, residual, psf),
        }
    }

    fn compute_impl(
        &self,
        session: &mut MaskingSession,
        residual: ArrayView4<'_, f32>,
        psf: ArrayView4<'_, f32>,
    ) -> Result<MaskResult, MaskError> {
        self.config.validate()?;

        let (sidelobe, gate_ratio) = match self.config.mode {
            MaskMode::Cube => {
                let est = match session.sidelobe() {
                    Some(cached) => cached,
                    None => sidelobe::estimate_sidelobe_ratio(psf, &self.config.sidelobe_params())?,
                };
                (Some(est), est.ratio)
            }
            MaskMode::Calibrator => (None, CALIBRATOR_GATE_RATIO),
        };

        let params = CatalogParams {
            gate_ratio,
            max_islands: self.config.max_islands_per_plane,
            polarization: self.config.polarization,
        };
        let mut catalog = IslandCatalog::build(residual, &params)?;

        if self.config.mode == MaskMode::Calibrator {
            check_single_plane(&catalog)?;
        }

        let thresholds = threshold::compute_thresholds(&catalog, gate_ratio);
        let island_peaks = catalog.island_peaks();
        let clusters = select::select_clusters(&mut catalog, self.config.npeak);
        let mask = paint::paint_mask(
            residual.dim(),
            session.mask().map(|m| m.view()),
            &clusters,
            &catalog,
        )?;

        info!(
            threshold = thresholds.global,
            gate_ratio,
            islands = catalog.total_islands(),
            clusters = clusters.len(),
            "clean mask computed"
        );

        session.commit_mask(mask.clone(), sidelobe);

        Ok(MaskResult {
            mask,
            threshold: thresholds.global,
            plane_thresholds: thresholds.plane_thresholds,
            gate_ratio,
            sidelobe,
            clusters,
            island_peaks,
            island_cap: params.max_islands,
        })
    }

    /// Load residual and PSF through their pixel sources and compute the mask.
    pub fn compute_from_sources(
        &self,
        session: &mut MaskingSession,
        residual: &dyn PixelSource,
        psf: &dyn PixelSource,
    ) -> Result<MaskResult> {
        let residual = as_cube(residual.get_all().context("Failed to read residual")?)?;
        let psf = as_cube(psf.get_all().context("Failed to read PSF")?)?;
        let result = self
            .compute(session, residual.view(), psf.view())
            .context("Mask computation failed")?;
        Ok(result)
    }
}

impl Default for CleanMasker {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a mask into a pixel source whose shape is the mask's, with unit
/// polarization/channel axes optionally dropped.
pub fn write_mask(mask: &Array4<f32>, target: &mut dyn PixelSource) -> Result<()> {
    let shape = target.shape();
    let view = mask
        .view()
        .into_shape_with_order(IxDyn(&shape))
        .with_context(|| format!("mask {:?} does not fit target {:?}", mask.shape(), shape))?;
    let origin = vec![0; shape.len()];
    target.put_chunk(&origin, view).context("Failed to write mask")
}

/// The calibrator variant assumes exactly one plane carries emission.
fn check_single_plane(catalog: &IslandCatalog) -> Result<(), MaskError> {
    let planes = catalog.occupied_planes();
    if planes.len() > 1 {
        return Err(MaskError::UnsupportedTopology { planes });
    }
    if let Some(&plane) = planes.first() {
        let islands = catalog.plane(plane).len();
        if islands > 1 {
            warn!(plane, islands, "calibrator image has more than one island");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryGrid;
    use approx::assert_relative_eq;
    use ndarray::{Array2, Array4};

    fn psf(sidelobe: f32) -> Array4<f32> {
        let mut psf = Array4::<f32>::zeros((15, 15, 1, 1));
        psf[[7, 7, 0, 0]] = 1.0;
        for &(x, y) in &[(6, 7), (8, 7), (7, 6), (7, 8)] {
            psf[[x, y, 0, 0]] = 0.5;
        }
        psf[[12, 7, 0, 0]] = sidelobe;
        psf[[13, 7, 0, 0]] = sidelobe * 0.8;
        psf
    }

    fn residual() -> Array4<f32> {
        let mut cube = Array4::<f32>::zeros((20, 20, 1, 2));
        for chan in 0..2 {
            cube[[5, 5, 0, chan]] = 10.0;
            cube[[5, 6, 0, chan]] = 8.0;
            cube[[6, 5, 0, chan]] = 7.0;
        }
        cube[[15, 15, 0, 1]] = 6.0;
        cube[[15, 16, 0, 1]] = 5.0;
        // Noise spike: isolated
        cube[[1, 18, 0, 0]] = 9.0;
        cube
    }

    #[test]
    fn test_compute_cube_mask() {
        let mut session = MaskingSession::new();
        let result = CleanMasker::new()
            .compute(&mut session, residual().view(), psf(0.3).view())
            .unwrap();

        assert_relative_eq!(result.gate_ratio, 0.3);
        assert_eq!(result.clusters.len(), 2);
        assert_eq!(result.island_count(), 3);
        // Plane 0 one island: 10 × 0.09; plane 1 two islands: 6 × 0.3
        assert_relative_eq!(result.plane_thresholds[0], 0.9, epsilon = 1e-5);
        assert_relative_eq!(result.plane_thresholds[1], 1.8, epsilon = 1e-5);
        assert_relative_eq!(result.threshold, 1.8, epsilon = 1e-5);
        assert_eq!(result.mask.iter().filter(|&&v| v == 1.0).count(), 8);
        assert_eq!(result.mask[[1, 18, 0, 0]], 0.0, "isolated spike not masked");

        assert!(session.mask().is_some());
        assert_eq!(session.sidelobe().map(|s| s.ratio), Some(result.gate_ratio));
    }

    #[test]
    fn test_custom_thread_pool_matches_global() {
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(1)
                .build()
                .unwrap(),
        );

        let mut global_session = MaskingSession::new();
        let global = CleanMasker::new()
            .compute(&mut global_session, residual().view(), psf(0.3).view())
            .unwrap();

        let mut pooled_session = MaskingSession::new();
        let pooled = CleanMasker::new()
            .with_thread_pool(pool)
            .compute(&mut pooled_session, residual().view(), psf(0.3).view())
            .unwrap();

        assert_eq!(pooled.mask, global.mask);
        assert_eq!(pooled.threshold, global.threshold);
        assert_eq!(pooled.plane_thresholds, global.plane_thresholds);
        assert_eq!(pooled.island_peaks, global.island_peaks);
        assert_eq!(pooled.clusters, global.clusters);
        assert_eq!(pooled.island_cap, MAX_ISLANDS_PER_PLANE);
    }

    #[test]
    fn test_sidelobe_cached_across_calls() {
        let mut session = MaskingSession::new();
        let masker = CleanMasker::new();
        masker
            .compute(&mut session, residual().view(), psf(0.3).view())
            .unwrap();
        // A different PSF is ignored once the session holds an estimate
        let second = masker
            .compute(&mut session, residual().view(), psf(0.6).view())
            .unwrap();
        assert_relative_eq!(second.gate_ratio, 0.3);
    }

    #[test]
    fn test_npeak_limits_clusters() {
        let mut session = MaskingSession::new();
        let result = CleanMasker::new()
            .with_npeak(1)
            .compute(&mut session, residual().view(), psf(0.3).view())
            .unwrap();
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].peak, 10.0);
        assert_eq!(result.mask[[15, 15, 0, 1]], 0.0);
    }

    #[test]
    fn test_zero_npeak_rejected_before_work() {
        let mut session = MaskingSession::new();
        let result = CleanMasker::new()
            .with_npeak(0)
            .compute(&mut session, residual().view(), psf(0.3).view());
        assert!(matches!(
            result,
            Err(MaskError::Configuration { parameter: "npeak", .. })
        ));
        assert!(session.mask().is_none());
        assert!(session.sidelobe().is_none());
    }

    #[test]
    fn test_calibrator_single_plane() {
        let mut cube = Array4::<f32>::zeros((12, 12, 1, 3));
        cube[[6, 6, 0, 1]] = 4.0;
        cube[[6, 7, 0, 1]] = 3.0;
        cube[[2, 2, 0, 1]] = 2.5;
        cube[[2, 3, 0, 1]] = 2.5;

        let mut session = MaskingSession::new();
        let result = CleanMasker::new()
            .with_mode(MaskMode::Calibrator)
            .compute(&mut session, cube.view(), Array4::zeros((1, 1, 1, 1)).view())
            .unwrap();
        assert!(result.sidelobe.is_none());
        assert_eq!(result.gate_ratio, CALIBRATOR_GATE_RATIO);
        // Two islands on the one plane: warning only
        assert_eq!(result.island_peaks[1].len(), 2);
        assert_relative_eq!(result.threshold, 2.5 * 0.5);
    }

    #[test]
    fn test_calibrator_multiple_planes_is_fatal() {
        let mut cube = Array4::<f32>::zeros((12, 12, 1, 3));
        cube[[6, 6, 0, 0]] = 4.0;
        cube[[6, 7, 0, 0]] = 3.0;
        cube[[6, 6, 0, 2]] = 4.0;
        cube[[6, 7, 0, 2]] = 3.0;

        let mut session = MaskingSession::new();
        let result = CleanMasker::new()
            .with_mode(MaskMode::Calibrator)
            .compute(&mut session, cube.view(), Array4::zeros((1, 1, 1, 1)).view());
        match result {
            Err(MaskError::UnsupportedTopology { planes }) => assert_eq!(planes, vec![0, 2]),
            other => panic!("expected topology error, got {:?}", other.map(|r| r.threshold)),
        }
        assert!(session.mask().is_none(), "no mask stored on failure");
    }

    #[test]
    fn test_sources_roundtrip() {
        // Rank-2 residual and PSF through the pixel-source seam
        let mut res = Array2::<f32>::zeros((10, 10));
        res[[4, 4]] = 5.0;
        res[[4, 5]] = 4.0;
        let residual = MemoryGrid::new(res.into_dyn());
        let psf_grid = MemoryGrid::new(psf(0.3).into_dyn());

        let mut session = MaskingSession::new();
        let result = CleanMasker::new()
            .compute_from_sources(&mut session, &residual, &psf_grid)
            .unwrap();
        assert_eq!(result.mask.shape(), &[10, 10, 1, 1]);

        let mut target = MemoryGrid::from_template(&residual);
        write_mask(&result.mask, &mut target).unwrap();
        assert_eq!(target.data()[[4, 4]], 1.0);
        assert_eq!(target.data()[[4, 5]], 1.0);
        assert_eq!(target.data().sum(), 2.0);
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: MaskConfig =
            serde_json::from_str(r#"{ "npeak": 3, "mode": "calibrator" }"#).unwrap();
        assert_eq!(config.npeak, 3);
        assert_eq!(config.mode, MaskMode::Calibrator);
        assert_eq!(config.island_threshold, 0.1);
        assert_eq!(config.max_islands_per_plane, MAX_ISLANDS_PER_PLANE);
        assert!(CleanMasker::from_config(config).config().validate().is_ok());
    }
}
