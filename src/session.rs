/// State carried across the masking calls of one imaging run.

use ndarray::Array4;

use crate::convergence::{ConvergenceHistory, IterationRecord};
use crate::masking::sidelobe::SidelobeEstimate;

/// Cached PSF sidelobe estimate, the cumulative mask and the iteration history.
///
/// One session per imaging run; nothing is shared between runs.
#[derive(Clone, Debug, Default)]
pub struct MaskingSession {
    sidelobe: Option<SidelobeEstimate>,
    mask: Option<Array4<f32>>,
    history: ConvergenceHistory,
}

impl MaskingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a mask produced by an earlier run.
    pub fn with_prior_mask(mut self, mask: Array4<f32>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn sidelobe(&self) -> Option<SidelobeEstimate> {
        self.sidelobe
    }

    /// Latest cumulative mask.
    pub fn mask(&self) -> Option<&Array4<f32>> {
        self.mask.as_ref()
    }

    pub fn history(&self) -> &ConvergenceHistory {
        &self.history
    }

    /// Append a completed iteration to the history.
    pub fn record(&mut self, record: IterationRecord) {
        self.history.push(record);
    }

    pub(crate) fn commit_mask(&mut self, mask: Array4<f32>, sidelobe: Option<SidelobeEstimate>) {
        if sidelobe.is_some() {
            self.sidelobe = sidelobe;
        }
        self.mask = Some(mask);
    }
}
