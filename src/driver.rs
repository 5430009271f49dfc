/// Major-cycle loop: mask, clean, record, evaluate.

use anyhow::{ensure, Context, Result};
use ndarray::{Array4, ArrayView4};
use tracing::info;

use crate::convergence::{ConvergenceEvaluator, IterationRecord, StopRule};
use crate::masking::{CleanMasker, MaskResult};
use crate::session::MaskingSession;
use crate::source::{MemoryGrid, PixelSource};

/// The external CLEAN step.
pub trait Deconvolver {
    /// Clean inside `mask` down to `threshold` and report the new residual.
    fn clean(&mut self, mask: ArrayView4<'_, f32>, threshold: f32) -> Result<CleanOutcome>;
}

#[derive(Clone, Debug)]
pub struct CleanOutcome {
    /// Residual after cleaning, same shape as the mask.
    pub residual: Array4<f32>,
    /// Total flux cleaned so far.
    pub cleaned_flux: f64,
    /// RMS outside the mask; measured from `residual` when absent.
    pub non_cleaned_rms: Option<f64>,
}

/// How a loop run ended.
#[derive(Clone, Debug)]
pub struct LoopSummary {
    /// Clean calls made.
    pub iterations: usize,
    /// Threshold of the last clean call (0.0 when nothing was cleaned).
    pub threshold: f32,
    /// Mask of the last clean call.
    pub mask: Option<Array4<f32>>,
    pub stop_reasons: Vec<StopRule>,
    /// The residual held no islands to mask.
    pub exhausted: bool,
}

pub struct CleanLoop {
    masker: CleanMasker,
    evaluator: ConvergenceEvaluator,
}

impl CleanLoop {
    pub fn new(masker: CleanMasker, evaluator: ConvergenceEvaluator) -> Self {
        CleanLoop { masker, evaluator }
    }

    /// Run until a convergence rule fires or nothing is left to mask.
    pub fn run(
        &self,
        session: &mut MaskingSession,
        deconvolver: &mut dyn Deconvolver,
        residual: Array4<f32>,
        psf: ArrayView4<'_, f32>,
    ) -> Result<LoopSummary> {
        let shape = residual.dim();
        let mut current = self.masker.compute(session, residual.view(), psf)?;
        if current.island_count() == 0 {
            info!("no islands to mask");
            return Ok(summary(0, current, Vec::new(), true));
        }

        let mut iterations = 0;
        loop {
            let outcome = deconvolver
                .clean(current.mask.view(), current.threshold)
                .with_context(|| format!("Clean iteration {} failed", iterations))?;
            iterations += 1;
            ensure!(
                outcome.residual.dim() == shape,
                "deconvolver returned residual {:?}, expected {:?}",
                outcome.residual.shape(),
                shape
            );

            let rms = match outcome.non_cleaned_rms {
                Some(rms) => Some(rms),
                None => rms_outside_mask(&outcome.residual, &current.mask)?,
            };
            session.record(record(&current, &outcome, rms));

            let next = self.masker.compute(session, outcome.residual.view(), psf)?;
            let decision = self
                .evaluator
                .evaluate(session.history(), next.threshold as f64)?;
            let exhausted = next.island_count() == 0;
            if decision.verdict.is_stop() || exhausted {
                let reasons = decision.stop_reasons();
                info!(iterations, exhausted, reasons = ?reasons, "clean loop finished");
                // `current` is what the last clean call used
                return Ok(summary(iterations, current, reasons, exhausted));
            }
            current = next;
        }
    }
}

fn summary(
    iterations: usize,
    last: MaskResult,
    stop_reasons: Vec<StopRule>,
    exhausted: bool,
) -> LoopSummary {
    LoopSummary {
        iterations,
        threshold: last.threshold,
        mask: (iterations > 0).then_some(last.mask),
        stop_reasons,
        exhausted,
    }
}

fn record(mask: &MaskResult, outcome: &CleanOutcome, rms: Option<f64>) -> IterationRecord {
    let (min, max) = outcome
        .residual
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    IterationRecord {
        threshold: mask.threshold as f64,
        residual_max: max as f64,
        residual_min: min as f64,
        non_cleaned_rms: rms,
        cleaned_flux: outcome.cleaned_flux,
        island_peaks: mask
            .island_peaks
            .iter()
            .map(|p| p.iter().map(|&v| v as f64).collect())
            .collect(),
        island_cap: mask.island_cap,
    }
}

/// RMS of the residual where the mask is off; `None` if the mask covers everything.
fn rms_outside_mask(residual: &Array4<f32>, mask: &Array4<f32>) -> Result<Option<f64>> {
    let grid = MemoryGrid::new(residual.clone().into_dyn());
    let outside = mask.mapv(|v| v < 0.5).into_dyn();
    let stats = grid
        .statistics(Some(outside.view()), false)
        .context("Failed to measure off-mask rms")?;
    Ok((stats.npts > 0).then_some(stats.rms))
}
