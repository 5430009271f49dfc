/// Cleaning thresholds derived from the island catalog.

use super::catalog::IslandCatalog;

/// Per-plane thresholds and their maximum.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdSummary {
    /// One threshold per plane; 0.0 for planes without islands.
    pub plane_thresholds: Vec<f32>,
    /// Maximum over `plane_thresholds` (0.0 if there are none).
    pub global: f32,
}

/// Threshold for one plane from its island peaks in encounter order.
///
/// With two or more islands the second-brightest peak scaled by `ratio` is
/// used; a lone island is scaled by `ratio²` so the mask can still reach into
/// its wings.
pub fn plane_threshold(peaks: &[f32], ratio: f32) -> f32 {
    match peaks {
        [] => 0.0,
        [only] => only * ratio * ratio,
        [_, second, ..] => second * ratio,
    }
}

/// Compute all plane thresholds for a freshly built catalog.
pub fn compute_thresholds(catalog: &IslandCatalog, ratio: f32) -> ThresholdSummary {
    let plane_thresholds: Vec<f32> = (0..catalog.num_planes())
        .map(|p| {
            let peaks: Vec<f32> = catalog.plane(p).iter().map(|i| i.peak).collect();
            plane_threshold(&peaks, ratio)
        })
        .collect();
    let global = plane_thresholds.iter().copied().fold(0.0_f32, f32::max);
    ThresholdSummary {
        plane_thresholds,
        global,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masking::catalog::CatalogParams;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    #[test]
    fn test_plane_threshold_branches() {
        assert_eq!(plane_threshold(&[], 0.5), 0.0);
        assert_relative_eq!(plane_threshold(&[8.0], 0.5), 2.0);
        assert_relative_eq!(plane_threshold(&[8.0, 6.0, 1.0], 0.5), 3.0);
    }

    #[test]
    fn test_empty_plane_zero_global_from_others() {
        // Plane 0 empty, plane 1 one island, plane 2 two islands
        let mut cube = Array4::<f32>::zeros((12, 12, 1, 3));
        cube[[2, 2, 0, 1]] = 8.0;
        cube[[2, 3, 0, 1]] = 7.0;
        cube[[2, 2, 0, 2]] = 10.0;
        cube[[2, 3, 0, 2]] = 9.0;
        cube[[8, 8, 0, 2]] = 6.0;
        cube[[8, 9, 0, 2]] = 6.0;

        let params = CatalogParams {
            gate_ratio: 0.5,
            ..CatalogParams::default()
        };
        let catalog = IslandCatalog::build(cube.view(), &params).unwrap();
        let summary = compute_thresholds(&catalog, 0.5);

        assert_eq!(summary.plane_thresholds[0], 0.0);
        assert_relative_eq!(summary.plane_thresholds[1], 8.0 * 0.25);
        assert_relative_eq!(summary.plane_thresholds[2], 6.0 * 0.5);
        assert_relative_eq!(summary.global, 3.0);
    }
}
