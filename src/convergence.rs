/// Stopping heuristics for the major-cycle clean loop.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MaskError;
use crate::types::{Verdict, MAX_ISLANDS_PER_PLANE};

/// Measurements from one completed clean iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Threshold the iteration cleaned down to.
    pub threshold: f64,
    pub residual_max: f64,
    pub residual_min: f64,
    /// RMS of the residual outside the clean mask, if it could be measured.
    pub non_cleaned_rms: Option<f64>,
    /// Total flux cleaned so far.
    pub cleaned_flux: f64,
    /// Island peaks found in the iteration's residual, grouped per plane.
    pub island_peaks: Vec<Vec<f64>>,
    /// Per-plane island cap the peaks were detected with. A plane holding this
    /// many islands is saturated.
    #[serde(default = "default_island_cap")]
    pub island_cap: usize,
}

fn default_island_cap() -> usize {
    MAX_ISLANDS_PER_PLANE
}

impl Default for IterationRecord {
    fn default() -> Self {
        IterationRecord {
            threshold: 0.0,
            residual_max: 0.0,
            residual_min: 0.0,
            non_cleaned_rms: None,
            cleaned_flux: 0.0,
            island_peaks: Vec::new(),
            island_cap: MAX_ISLANDS_PER_PLANE,
        }
    }
}

/// Append-only record of completed iterations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceHistory {
    records: Vec<IterationRecord>,
}

impl ConvergenceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// Record before the latest one.
    pub fn previous(&self) -> Option<&IterationRecord> {
        self.records.len().checked_sub(2).map(|i| &self.records[i])
    }
}

impl FromIterator<IterationRecord> for ConvergenceHistory {
    fn from_iter<I: IntoIterator<Item = IterationRecord>>(iter: I) -> Self {
        ConvergenceHistory {
            records: iter.into_iter().collect(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StopRule {
    /// The new threshold is above the last one.
    Diverging,
    /// Cleaned flux grew by less than the configured fraction.
    FluxChangeTooSmall,
    /// Threshold is close to the off-source rms and the residual looks like noise.
    ThresholdNearNoiseFloor,
    /// Every occupied plane is full of islands of nearly equal brightness.
    NoisePeaksUniform,
    /// Island peaks are uniform and barely moved since the last iteration.
    NoisePeaksOverlap,
    IterationLimit,
}

impl StopRule {
    pub fn name(&self) -> &'static str {
        match self {
            StopRule::Diverging => "diverging",
            StopRule::FluxChangeTooSmall => "flux_change_too_small",
            StopRule::ThresholdNearNoiseFloor => "threshold_near_noise_floor",
            StopRule::NoisePeaksUniform => "noise_peaks_uniform",
            StopRule::NoisePeaksOverlap => "noise_peaks_overlap",
            StopRule::IterationLimit => "iteration_limit",
        }
    }
}

/// How one rule came out.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleOutcome {
    pub rule: StopRule,
    /// False when switched off, or when its inputs are unavailable.
    pub enabled: bool,
    pub fired: bool,
    /// Named values the rule compared.
    pub operands: Vec<(&'static str, f64)>,
}

impl RuleOutcome {
    fn disabled(rule: StopRule) -> Self {
        RuleOutcome {
            rule,
            enabled: false,
            fired: false,
            operands: Vec::new(),
        }
    }

    /// Enabled and fired.
    pub fn halts(&self) -> bool {
        self.enabled && self.fired
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConvergenceDecision {
    pub verdict: Verdict,
    pub outcomes: Vec<RuleOutcome>,
}

impl ConvergenceDecision {
    /// Rules that caused a stop.
    pub fn stop_reasons(&self) -> Vec<StopRule> {
        self.outcomes
            .iter()
            .filter(|o| o.halts())
            .map(|o| o.rule)
            .collect()
    }
}

/// Rule switches and limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub diverging: bool,
    pub flux_change: bool,
    /// Minimum relative flux increase per iteration.
    pub flux_change_limit: f64,
    pub low_threshold: bool,
    /// Threshold below this multiple of the rms counts as near the noise floor.
    pub low_threshold_limit: f64,
    /// Residual max must stay below this multiple of |residual min|.
    pub residual_symmetry_limit: f64,
    pub uniform_peaks: bool,
    /// Max/min island peak ratio below which a plane's peaks count as uniform.
    pub uniform_peaks_limit: f64,
    pub overlapping_peaks: bool,
    pub overlapping_peaks_limit: f64,
    /// Minimum overlap of consecutive peak ranges, as a fraction of the latest range.
    pub overlap_fraction: f64,
    /// Stop after this many iterations; `None` never stops on count.
    pub max_iterations: Option<usize>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        ConvergenceConfig {
            diverging: true,
            flux_change: true,
            flux_change_limit: 0.03,
            low_threshold: true,
            low_threshold_limit: 1.5,
            residual_symmetry_limit: 1.3,
            uniform_peaks: true,
            uniform_peaks_limit: 1.2,
            overlapping_peaks: true,
            overlapping_peaks_limit: 2.0,
            overlap_fraction: 0.3,
            max_iterations: None,
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Result<(), MaskError> {
        let positive = [
            ("flux_change_limit", self.flux_change_limit),
            ("low_threshold_limit", self.low_threshold_limit),
            ("residual_symmetry_limit", self.residual_symmetry_limit),
            ("uniform_peaks_limit", self.uniform_peaks_limit),
            ("overlapping_peaks_limit", self.overlapping_peaks_limit),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(MaskError::config(name, format!("must be positive, got {}", value)));
            }
        }
        if !(0.0..=1.0).contains(&self.overlap_fraction) {
            return Err(MaskError::config(
                "overlap_fraction",
                format!("must lie in [0, 1], got {}", self.overlap_fraction),
            ));
        }
        if self.max_iterations == Some(0) {
            return Err(MaskError::config("max_iterations", "must be at least 1"));
        }
        Ok(())
    }
}

/// Convergence evaluator builder.
#[derive(Clone, Debug, Default)]
pub struct ConvergenceEvaluator {
    config: ConvergenceConfig,
    /// `with_rule(IterationLimit, true)` was called.
    limit_requested: bool,
}

impl ConvergenceEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ConvergenceConfig) -> Self {
        ConvergenceEvaluator {
            config,
            limit_requested: false,
        }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// Switch a rule on or off.
    ///
    /// The iteration limit has no default count: switching it off clears the
    /// limit, and switching it on only keeps a limit already set through
    /// [`with_max_iterations`](Self::with_max_iterations). Without one,
    /// `evaluate` reports a configuration error.
    pub fn with_rule(mut self, rule: StopRule, enabled: bool) -> Self {
        match rule {
            StopRule::Diverging => self.config.diverging = enabled,
            StopRule::FluxChangeTooSmall => self.config.flux_change = enabled,
            StopRule::ThresholdNearNoiseFloor => self.config.low_threshold = enabled,
            StopRule::NoisePeaksUniform => self.config.uniform_peaks = enabled,
            StopRule::NoisePeaksOverlap => self.config.overlapping_peaks = enabled,
            StopRule::IterationLimit => {
                self.limit_requested = enabled;
                if !enabled {
                    self.config.max_iterations = None;
                }
            }
        }
        self
    }

    pub fn with_flux_change_limit(mut self, limit: f64) -> Self {
        self.config.flux_change_limit = limit;
        self
    }

    pub fn with_low_threshold_limit(mut self, limit: f64) -> Self {
        self.config.low_threshold_limit = limit;
        self
    }

    pub fn with_uniform_peaks_limit(mut self, limit: f64) -> Self {
        self.config.uniform_peaks_limit = limit;
        self
    }

    pub fn with_overlapping_peaks_limit(mut self, limit: f64) -> Self {
        self.config.overlapping_peaks_limit = limit;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = Some(max);
        self
    }

    /// Decide whether the loop should stop, given the history so far and the
    /// threshold proposed for the next iteration.
    ///
    /// Nothing can stop the loop before a second iteration has been recorded.
    pub fn evaluate(
        &self,
        history: &ConvergenceHistory,
        new_threshold: f64,
    ) -> Result<ConvergenceDecision, MaskError> {
        self.config.validate()?;
        if self.limit_requested && self.config.max_iterations.is_none() {
            return Err(MaskError::config(
                "max_iterations",
                "iteration limit enabled without a count; set one with with_max_iterations",
            ));
        }
        let cfg = &self.config;

        let outcomes = match (history.latest(), history.previous()) {
            (Some(latest), Some(previous)) => vec![
                self.diverging(latest, new_threshold),
                self.flux_change(latest, previous),
                self.low_threshold(latest, new_threshold),
                self.uniform_peaks(latest),
                self.overlapping_peaks(latest, previous),
                self.iteration_limit(history.len()),
            ],
            _ => [
                StopRule::Diverging,
                StopRule::FluxChangeTooSmall,
                StopRule::ThresholdNearNoiseFloor,
                StopRule::NoisePeaksUniform,
                StopRule::NoisePeaksOverlap,
                StopRule::IterationLimit,
            ]
            .into_iter()
            .map(RuleOutcome::disabled)
            .collect(),
        };

        for o in &outcomes {
            info!(
                rule = o.rule.name(),
                enabled = o.enabled,
                fired = o.fired,
                operands = ?o.operands,
                "convergence rule"
            );
        }

        let verdict = if outcomes.iter().any(RuleOutcome::halts) {
            Verdict::Stop
        } else {
            Verdict::Continue
        };
        info!(
            iteration = history.len().saturating_sub(1),
            new_threshold,
            ?verdict,
            max_iterations = ?cfg.max_iterations,
            "convergence verdict"
        );

        Ok(ConvergenceDecision { verdict, outcomes })
    }

    fn diverging(&self, latest: &IterationRecord, new_threshold: f64) -> RuleOutcome {
        RuleOutcome {
            rule: StopRule::Diverging,
            enabled: self.config.diverging,
            fired: new_threshold > latest.threshold,
            operands: vec![
                ("new_threshold", new_threshold),
                ("threshold", latest.threshold),
            ],
        }
    }

    fn flux_change(&self, latest: &IterationRecord, previous: &IterationRecord) -> RuleOutcome {
        if previous.cleaned_flux == 0.0 {
            return RuleOutcome::disabled(StopRule::FluxChangeTooSmall);
        }
        let change = (latest.cleaned_flux - previous.cleaned_flux) / previous.cleaned_flux;
        RuleOutcome {
            rule: StopRule::FluxChangeTooSmall,
            enabled: self.config.flux_change,
            fired: change < self.config.flux_change_limit,
            operands: vec![
                ("flux", latest.cleaned_flux),
                ("previous_flux", previous.cleaned_flux),
                ("change", change),
                ("limit", self.config.flux_change_limit),
            ],
        }
    }

    fn low_threshold(&self, latest: &IterationRecord, new_threshold: f64) -> RuleOutcome {
        let Some(rms) = latest.non_cleaned_rms.filter(|r| r.is_finite()) else {
            return RuleOutcome::disabled(StopRule::ThresholdNearNoiseFloor);
        };
        let cfg = &self.config;
        let near_floor = new_threshold < cfg.low_threshold_limit * rms;
        let symmetric =
            latest.residual_max.abs() < cfg.residual_symmetry_limit * latest.residual_min.abs();
        RuleOutcome {
            rule: StopRule::ThresholdNearNoiseFloor,
            enabled: cfg.low_threshold,
            fired: near_floor && symmetric,
            operands: vec![
                ("new_threshold", new_threshold),
                ("rms", rms),
                ("residual_max", latest.residual_max),
                ("residual_min", latest.residual_min),
            ],
        }
    }

    fn uniform_peaks(&self, latest: &IterationRecord) -> RuleOutcome {
        let cfg = &self.config;
        let mut planes = 0;
        let mut all = true;
        let mut worst_ratio = 0.0_f64;
        for peaks in latest.island_peaks.iter().filter(|p| !p.is_empty()) {
            let (lo, hi) = peak_range(peaks);
            let ratio = hi / lo;
            planes += 1;
            worst_ratio = worst_ratio.max(ratio);
            all &= peaks.len() == latest.island_cap && hi < cfg.uniform_peaks_limit * lo;
        }
        RuleOutcome {
            rule: StopRule::NoisePeaksUniform,
            enabled: cfg.uniform_peaks,
            fired: planes > 0 && all,
            operands: vec![
                ("planes", planes as f64),
                ("max_ratio", worst_ratio),
                ("limit", cfg.uniform_peaks_limit),
                ("island_cap", latest.island_cap as f64),
            ],
        }
    }

    fn overlapping_peaks(&self, latest: &IterationRecord, previous: &IterationRecord) -> RuleOutcome {
        let cfg = &self.config;
        let mut planes = 0;
        let mut all = true;
        let mut min_overlap = 1.0_f64;
        for (plane, peaks) in latest.island_peaks.iter().enumerate() {
            if peaks.is_empty() {
                continue;
            }
            planes += 1;
            let (lo, hi) = peak_range(peaks);
            let overlap = match previous.island_peaks.get(plane).filter(|p| !p.is_empty()) {
                Some(prev) => range_overlap((lo, hi), peak_range(prev)),
                None => 0.0,
            };
            min_overlap = min_overlap.min(overlap);
            all &= hi < cfg.overlapping_peaks_limit * lo && overlap > cfg.overlap_fraction;
        }
        RuleOutcome {
            rule: StopRule::NoisePeaksOverlap,
            enabled: cfg.overlapping_peaks,
            fired: planes > 0 && all,
            operands: vec![
                ("planes", planes as f64),
                ("min_overlap", min_overlap),
                ("limit", cfg.overlap_fraction),
            ],
        }
    }

    fn iteration_limit(&self, completed: usize) -> RuleOutcome {
        let Some(max) = self.config.max_iterations else {
            return RuleOutcome::disabled(StopRule::IterationLimit);
        };
        RuleOutcome {
            rule: StopRule::IterationLimit,
            enabled: true,
            fired: completed >= max,
            operands: vec![("iterations", completed as f64), ("limit", max as f64)],
        }
    }
}

/// (min, max) of a non-empty peak list.
fn peak_range(peaks: &[f64]) -> (f64, f64) {
    peaks.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| {
        (lo.min(p), hi.max(p))
    })
}

/// Overlap of `current` with `previous`, as a fraction of `current`'s width.
///
/// A zero-width current range counts as fully overlapped when it lies inside
/// `previous`.
fn range_overlap(current: (f64, f64), previous: (f64, f64)) -> f64 {
    let (lo, hi) = current;
    let width = hi - lo;
    if width <= 0.0 {
        return if previous.0 <= lo && lo <= previous.1 { 1.0 } else { 0.0 };
    }
    let shared = hi.min(previous.1) - lo.max(previous.0);
    shared.max(0.0) / width
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// A record that trips none of the rules against itself.
    fn quiet(threshold: f64, flux: f64) -> IterationRecord {
        IterationRecord {
            threshold,
            residual_max: 10.0,
            residual_min: -1.0,
            non_cleaned_rms: None,
            cleaned_flux: flux,
            island_peaks: Vec::new(),
            island_cap: MAX_ISLANDS_PER_PLANE,
        }
    }

    fn decide(records: Vec<IterationRecord>, new_threshold: f64) -> ConvergenceDecision {
        let history: ConvergenceHistory = records.into_iter().collect();
        ConvergenceEvaluator::new()
            .evaluate(&history, new_threshold)
            .unwrap()
    }

    fn outcome(decision: &ConvergenceDecision, rule: StopRule) -> &RuleOutcome {
        decision.outcomes.iter().find(|o| o.rule == rule).unwrap()
    }

    #[test]
    fn test_first_iteration_always_continues() {
        let empty = decide(Vec::new(), 1.0);
        assert_eq!(empty.verdict, Verdict::Continue);

        // Diverging threshold and zero flux would otherwise stop
        let first = decide(vec![quiet(1.0, 0.0)], 5.0);
        assert_eq!(first.verdict, Verdict::Continue);
        assert!(first.outcomes.iter().all(|o| !o.enabled));
        assert_eq!(first.outcomes.len(), 6);
    }

    #[test]
    fn test_flux_change_boundary() {
        let stop = decide(vec![quiet(2.0, 100.0), quiet(1.0, 102.9)], 0.5);
        assert_eq!(stop.verdict, Verdict::Stop);
        assert_eq!(stop.stop_reasons(), vec![StopRule::FluxChangeTooSmall]);

        let go = decide(vec![quiet(2.0, 100.0), quiet(1.0, 103.0)], 0.5);
        assert_eq!(go.verdict, Verdict::Continue, "3% growth is enough");
        let flux = outcome(&go, StopRule::FluxChangeTooSmall);
        assert!(flux.enabled && !flux.fired);
    }

    #[test]
    fn test_zero_previous_flux_skips_rule() {
        let d = decide(vec![quiet(2.0, 0.0), quiet(1.0, 0.0)], 0.5);
        assert!(!outcome(&d, StopRule::FluxChangeTooSmall).enabled);
        assert_eq!(d.verdict, Verdict::Continue);
    }

    #[test]
    fn test_diverging_threshold() {
        let d = decide(vec![quiet(2.0, 100.0), quiet(1.0, 200.0)], 1.5);
        assert_eq!(d.stop_reasons(), vec![StopRule::Diverging]);
    }

    #[test]
    fn test_near_noise_floor_needs_rms() {
        let mut latest = quiet(1.0, 200.0);
        latest.residual_max = 1.0;
        latest.residual_min = -0.9;
        let d = decide(vec![quiet(2.0, 100.0), latest.clone()], 0.9);
        assert!(!outcome(&d, StopRule::ThresholdNearNoiseFloor).enabled);
        assert_eq!(d.verdict, Verdict::Continue);

        latest.non_cleaned_rms = Some(1.0);
        let d = decide(vec![quiet(2.0, 100.0), latest.clone()], 0.9);
        assert_eq!(d.stop_reasons(), vec![StopRule::ThresholdNearNoiseFloor]);

        // Positive residual still dominates: not noise yet
        latest.residual_max = 2.0;
        let d = decide(vec![quiet(2.0, 100.0), latest], 0.9);
        assert_eq!(d.verdict, Verdict::Continue);
    }

    #[test]
    fn test_uniform_peaks_need_full_planes() {
        let full: Vec<f64> = (0..MAX_ISLANDS_PER_PLANE)
            .map(|k| 1.1 - 0.003 * k as f64)
            .collect();
        let mut latest = quiet(1.0, 200.0);
        latest.island_peaks = vec![full.clone(), Vec::new(), full.clone()];
        let d = decide(vec![quiet(2.0, 100.0), latest.clone()], 0.5);
        assert!(d.stop_reasons().contains(&StopRule::NoisePeaksUniform));

        // One plane short of the cap
        latest.island_peaks[2].pop();
        let d = decide(vec![quiet(2.0, 100.0), latest], 0.5);
        assert!(!outcome(&d, StopRule::NoisePeaksUniform).fired);
    }

    #[test]
    fn test_uniform_peaks_follow_recorded_cap() {
        // Detection ran with a cap of 10; a plane holding 10 islands is saturated
        let mut latest = quiet(1.0, 200.0);
        latest.island_cap = 10;
        latest.island_peaks = vec![(0..10).map(|k| 1.1 - 0.003 * k as f64).collect()];
        let d = decide(vec![quiet(2.0, 100.0), latest.clone()], 0.5);
        assert_eq!(d.stop_reasons(), vec![StopRule::NoisePeaksUniform]);

        // The same peaks under the default cap are not saturated
        latest.island_cap = MAX_ISLANDS_PER_PLANE;
        let d = decide(vec![quiet(2.0, 100.0), latest], 0.5);
        assert!(!outcome(&d, StopRule::NoisePeaksUniform).fired);
    }

    #[test]
    fn test_overlapping_peak_ranges() {
        let mut previous = quiet(2.0, 100.0);
        previous.island_peaks = vec![vec![1.5, 1.2, 1.0]];
        let mut latest = quiet(1.0, 200.0);
        latest.island_peaks = vec![vec![1.6, 1.3, 1.1]];

        let d = decide(vec![previous.clone(), latest.clone()], 0.5);
        let rule = outcome(&d, StopRule::NoisePeaksOverlap);
        assert!(rule.fired);
        let overlap = rule.operands.iter().find(|(k, _)| *k == "min_overlap").unwrap().1;
        assert_relative_eq!(overlap, 0.8, epsilon = 1e-12);

        // Peaks moved away entirely
        latest.island_peaks = vec![vec![4.0, 3.0]];
        let d = decide(vec![previous, latest], 0.5);
        assert!(!outcome(&d, StopRule::NoisePeaksOverlap).fired);
    }

    #[test]
    fn test_range_overlap_degenerate() {
        assert_eq!(range_overlap((1.0, 1.0), (0.5, 2.0)), 1.0);
        assert_eq!(range_overlap((3.0, 3.0), (0.5, 2.0)), 0.0);
        assert_eq!(range_overlap((0.0, 1.0), (2.0, 3.0)), 0.0);
    }

    #[test]
    fn test_disabled_rule_does_not_stop() {
        let history: ConvergenceHistory = vec![quiet(2.0, 100.0), quiet(1.0, 101.0)]
            .into_iter()
            .collect();
        let d = ConvergenceEvaluator::new()
            .with_rule(StopRule::FluxChangeTooSmall, false)
            .evaluate(&history, 0.5)
            .unwrap();
        let flux = outcome(&d, StopRule::FluxChangeTooSmall);
        assert!(flux.fired && !flux.enabled);
        assert_eq!(d.verdict, Verdict::Continue);
    }

    #[test]
    fn test_iteration_limit() {
        let history: ConvergenceHistory = (0..3)
            .map(|i| quiet(3.0 - i as f64, 100.0 * 2f64.powi(i)))
            .collect();
        let evaluator = ConvergenceEvaluator::new().with_max_iterations(3);
        let d = evaluator.evaluate(&history, 0.5).unwrap();
        assert_eq!(d.stop_reasons(), vec![StopRule::IterationLimit]);

        let d = ConvergenceEvaluator::new().evaluate(&history, 0.5).unwrap();
        assert_eq!(d.verdict, Verdict::Continue);
    }

    #[test]
    fn test_iteration_limit_switch() {
        let history: ConvergenceHistory = vec![quiet(2.0, 100.0), quiet(1.0, 200.0)]
            .into_iter()
            .collect();

        // Switching on without a count is refused
        let result = ConvergenceEvaluator::new()
            .with_rule(StopRule::IterationLimit, true)
            .evaluate(&history, 0.5);
        assert!(matches!(
            result,
            Err(MaskError::Configuration { parameter: "max_iterations", .. })
        ));

        let d = ConvergenceEvaluator::new()
            .with_max_iterations(2)
            .with_rule(StopRule::IterationLimit, true)
            .evaluate(&history, 0.5)
            .unwrap();
        assert_eq!(d.stop_reasons(), vec![StopRule::IterationLimit]);

        let d = ConvergenceEvaluator::new()
            .with_max_iterations(2)
            .with_rule(StopRule::IterationLimit, false)
            .evaluate(&history, 0.5)
            .unwrap();
        assert!(!outcome(&d, StopRule::IterationLimit).enabled);
        assert_eq!(d.verdict, Verdict::Continue);
    }

    #[test]
    fn test_invalid_limit_rejected() {
        let result = ConvergenceEvaluator::new()
            .with_flux_change_limit(-0.1)
            .evaluate(&ConvergenceHistory::new(), 1.0);
        assert!(matches!(
            result,
            Err(MaskError::Configuration { parameter: "flux_change_limit", .. })
        ));
    }

    #[test]
    fn test_config_from_json() {
        let cfg: ConvergenceConfig =
            serde_json::from_str(r#"{ "flux_change_limit": 0.05, "overlapping_peaks": false }"#)
                .unwrap();
        assert_eq!(cfg.flux_change_limit, 0.05);
        assert!(!cfg.overlapping_peaks);
        assert!(cfg.diverging);
        assert_eq!(cfg.uniform_peaks_limit, 1.2);
        assert_eq!(cfg.max_iterations, None);
    }
}
