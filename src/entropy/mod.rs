//! # Entropy Analyzer - Volatility & Chaos Prediction
//!
//! Turns per-bloom entropy sample streams into trailing-window profiles,
//! chaos predictions, and stabilization recommendations.
//!
//! ## Responsibilities
//!
//! - Append samples into bounded per-bloom rings (1000 samples each)
//! - Recompute trailing-window profiles on every sample
//! - Score chaos from volatility, trend, acceleration, anomalies, and
//!   thermal correlation
//! - Nominate blooms for stabilization with literal sigil names
//! - Detect z-score outliers and cross-bloom correlations
//! - Extrapolate short-horizon entropy futures

use crate::clock::SharedClock;
use crate::error::{DawnError, Result};
use crate::sigil::InterventionSigil;
use crate::types::{Anomaly, ChaosAlert, EntropyProfile, EntropySample, RiskBand, Trend};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Z-score past which a sample counts as anomalous.
pub const ANOMALY_Z_THRESHOLD: f64 = 2.5;

/// Slope magnitude below which a series is considered flat.
const TREND_SLOPE_EPSILON: f64 = 0.005;

/// Sign-change fraction above which a series is oscillating.
const OSCILLATION_FRACTION: f64 = 0.5;

/// How many recent heat readings feed thermal correlation.
const THERMAL_HISTORY: usize = 256;

/// Entropy stream analyzer.
pub struct EntropyAnalyzer {
    rings: HashMap<String, VecDeque<EntropySample>>,
    profiles: HashMap<String, EntropyProfile>,
    ring_capacity: usize,
    window: usize,
    chaos_threshold: f64,
    thermal: VecDeque<f64>,
    last_sample: Option<EntropySample>,
    tick_peak: Option<(String, f64)>,
    validation_rejects: u64,
    clock: SharedClock,
}

impl EntropyAnalyzer {
    /// Create an analyzer.
    pub fn new(
        ring_capacity: usize,
        window: usize,
        chaos_threshold: f64,
        clock: SharedClock,
    ) -> Self {
        Self {
            rings: HashMap::new(),
            profiles: HashMap::new(),
            ring_capacity,
            window,
            chaos_threshold,
            thermal: VecDeque::new(),
            last_sample: None,
            tick_peak: None,
            validation_rejects: 0,
            clock,
        }
    }

    /// Mark the start of a tick; resets the per-tick entropy peak.
    pub fn begin_tick(&mut self) {
        self.tick_peak = None;
    }

    /// Append a sample to the bloom's ring and recompute its profile over
    /// the trailing window.
    pub fn add_sample(
        &mut self,
        bloom_id: &str,
        entropy: f64,
        source: &str,
    ) -> Result<EntropyProfile> {
        if !entropy.is_finite() || !(0.0..=1.0).contains(&entropy) {
            self.validation_rejects += 1;
            return Err(DawnError::Validation(format!(
                "entropy sample out of range for {bloom_id}: {entropy}"
            )));
        }

        let sample = EntropySample {
            bloom_id: bloom_id.to_string(),
            entropy,
            timestamp: self.clock.now(),
            source: source.to_string(),
        };

        let ring = self.rings.entry(bloom_id.to_string()).or_default();
        ring.push_back(sample.clone());
        while ring.len() > self.ring_capacity {
            ring.pop_front();
        }

        match &self.tick_peak {
            Some((_, peak)) if *peak >= entropy => {}
            _ => self.tick_peak = Some((bloom_id.to_string(), entropy)),
        }
        self.last_sample = Some(sample);

        let profile = self.recompute_profile(bloom_id);
        self.profiles.insert(bloom_id.to_string(), profile.clone());
        Ok(profile)
    }

    /// Variance of the bloom's trailing window; 0.0 for unknown blooms.
    pub fn get_entropy_variance(&self, bloom_id: &str) -> f64 {
        self.profiles
            .get(bloom_id)
            .map(|p| p.variance)
            .unwrap_or(0.0)
    }

    /// Profile of a bloom, if it has samples.
    pub fn profile(&self, bloom_id: &str) -> Option<&EntropyProfile> {
        self.profiles.get(bloom_id)
    }

    /// All profiles, keyed by bloom id.
    pub fn profiles(&self) -> &HashMap<String, EntropyProfile> {
        &self.profiles
    }

    /// Restore profiles from an imported snapshot.
    pub fn restore_profiles(&mut self, profiles: HashMap<String, EntropyProfile>) {
        self.profiles = profiles;
    }

    /// Blooms whose trailing-window mean entropy reaches `threshold`.
    pub fn get_hot_blooms(&self, threshold: f64) -> Vec<String> {
        let mut hot: Vec<(String, f64)> = self
            .profiles
            .iter()
            .filter(|(_, p)| p.mean >= threshold)
            .map(|(id, p)| (id.clone(), p.mean))
            .collect();
        hot.sort_by(|a, b| b.1.total_cmp(&a.1));
        hot.into_iter().map(|(id, _)| id).collect()
    }

    /// Blooms whose chaos score reaches the configured threshold, most
    /// chaotic first, with literal sigil names as countermeasures.
    pub fn recommend_stabilization(&self) -> Vec<ChaosAlert> {
        let now = self.clock.now();
        let mut alerts: Vec<ChaosAlert> = self
            .profiles
            .iter()
            .filter(|(_, p)| p.chaos_score >= self.chaos_threshold)
            .map(|(id, p)| {
                let risk = RiskBand::from_chaos(p.chaos_score);
                ChaosAlert {
                    bloom_id: id.clone(),
                    chaos_score: p.chaos_score,
                    risk,
                    recommended_actions: Self::actions_for(risk),
                    timestamp: now,
                }
            })
            .collect();
        alerts.sort_by(|a, b| b.chaos_score.total_cmp(&a.chaos_score));
        alerts
    }

    /// `(entropy, d_entropy/dt)` pairs over the bloom's full ring.
    pub fn get_entropy_phase_portrait(&self, bloom_id: &str) -> Vec<(f64, f64)> {
        let Some(ring) = self.rings.get(bloom_id) else {
            return Vec::new();
        };

        let samples: Vec<&EntropySample> = ring.iter().collect();
        samples
            .windows(2)
            .map(|pair| {
                let dt = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64
                    / 1000.0;
                let dt = if dt > 0.0 { dt } else { 1.0 };
                (pair[1].entropy, (pair[1].entropy - pair[0].entropy) / dt)
            })
            .collect()
    }

    /// Z-score outliers over the bloom's full ring.
    pub fn detect_entropy_anomalies(&self, bloom_id: &str, z_threshold: f64) -> Vec<Anomaly> {
        let Some(ring) = self.rings.get(bloom_id) else {
            return Vec::new();
        };

        let values: Vec<f64> = ring.iter().map(|s| s.entropy).collect();
        let (mean, std) = mean_std(&values);
        if std <= f64::EPSILON {
            return Vec::new();
        }

        ring.iter()
            .enumerate()
            .filter_map(|(index, sample)| {
                let z = (sample.entropy - mean) / std;
                (z.abs() >= z_threshold).then(|| Anomaly {
                    bloom_id: bloom_id.to_string(),
                    index,
                    entropy: sample.entropy,
                    z_score: z,
                    timestamp: sample.timestamp,
                })
            })
            .collect()
    }

    /// Pearson correlations of aligned sample tails for every bloom pair.
    pub fn get_entropy_correlations(&self, ids: &[String]) -> HashMap<(String, String), f64> {
        let mut out = HashMap::new();

        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                let (Some(ring_a), Some(ring_b)) = (self.rings.get(a), self.rings.get(b)) else {
                    continue;
                };
                let n = ring_a.len().min(ring_b.len());
                if n < 3 {
                    continue;
                }
                let tail_a: Vec<f64> =
                    ring_a.iter().skip(ring_a.len() - n).map(|s| s.entropy).collect();
                let tail_b: Vec<f64> =
                    ring_b.iter().skip(ring_b.len() - n).map(|s| s.entropy).collect();
                out.insert((a.clone(), b.clone()), pearson(&tail_a, &tail_b));
            }
        }

        out
    }

    /// Linear extrapolation of the trailing window, clamped to [0, 1].
    pub fn predict_entropy_future(&self, bloom_id: &str, steps: usize) -> Vec<f64> {
        let values = self.window_values(bloom_id);
        if values.is_empty() {
            return Vec::new();
        }
        if values.len() == 1 {
            return vec![values[0]; steps];
        }

        let slope = slope(&values);
        let last = *values.last().expect("non-empty");
        (1..=steps)
            .map(|i| (last + slope * i as f64).clamp(0.0, 1.0))
            .collect()
    }

    /// Feed a heat reading for thermal correlation. The scheduler relays one
    /// reading per heat update.
    pub fn inject_thermal_awareness(&mut self, heat: f64) {
        if !heat.is_finite() {
            warn!("ignoring non-finite thermal reading");
            return;
        }
        self.thermal.push_back(heat);
        while self.thermal.len() > THERMAL_HISTORY {
            self.thermal.pop_front();
        }
    }

    /// Highest entropy sampled since `begin_tick`, with its bloom id.
    pub fn tick_peak(&self) -> Option<(&str, f64)> {
        self.tick_peak.as_ref().map(|(id, e)| (id.as_str(), *e))
    }

    /// Most recent sample across all blooms.
    pub fn last_sample(&self) -> Option<&EntropySample> {
        self.last_sample.as_ref()
    }

    /// Samples rejected by validation.
    pub fn validation_rejects(&self) -> u64 {
        self.validation_rejects
    }

    /// Ring length for a bloom.
    pub fn ring_len(&self, bloom_id: &str) -> usize {
        self.rings.get(bloom_id).map(|r| r.len()).unwrap_or(0)
    }

    fn actions_for(risk: RiskBand) -> Vec<String> {
        let kinds: &[InterventionSigil] = match risk {
            RiskBand::Critical => &[
                InterventionSigil::EmergencyReset,
                InterventionSigil::StabilizeProtocol,
            ],
            RiskBand::High => &[
                InterventionSigil::StabilizeProtocol,
                InterventionSigil::EntropyRegulation,
            ],
            _ => &[InterventionSigil::EntropyRegulation],
        };
        kinds.iter().map(|k| k.name().to_string()).collect()
    }

    fn window_values(&self, bloom_id: &str) -> Vec<f64> {
        let Some(ring) = self.rings.get(bloom_id) else {
            return Vec::new();
        };
        let skip = ring.len().saturating_sub(self.window);
        ring.iter().skip(skip).map(|s| s.entropy).collect()
    }

    /// Profile over the trailing window. Chaos score:
    /// `0.25*volatility + 0.15*mean + 0.15*oscillation + 0.12*|acceleration|
    ///  + 0.12*anomaly_rate + 0.21*|thermal_correlation|`
    fn recompute_profile(&self, bloom_id: &str) -> EntropyProfile {
        let values = self.window_values(bloom_id);
        if values.is_empty() {
            return EntropyProfile::default();
        }

        let (mean, std_dev) = mean_std(&values);
        let variance = std_dev * std_dev;
        let volatility = (2.0 * std_dev).min(1.0);

        let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
        let oscillation = sign_change_fraction(&diffs);
        let slope = slope(&values);

        let trend = if diffs.len() >= 3 && oscillation > OSCILLATION_FRACTION {
            Trend::Oscillating
        } else if slope > TREND_SLOPE_EPSILON {
            Trend::Increasing
        } else if slope < -TREND_SLOPE_EPSILON {
            Trend::Decreasing
        } else {
            Trend::Stable
        };

        let second_diffs: Vec<f64> = diffs.windows(2).map(|w| w[1] - w[0]).collect();
        let acceleration = if second_diffs.is_empty() {
            0.0
        } else {
            let mean_accel =
                second_diffs.iter().sum::<f64>() / second_diffs.len() as f64;
            (10.0 * mean_accel.abs()).tanh()
        };

        let anomaly_rate = self.full_ring_anomaly_rate(bloom_id);
        let thermal_correlation = self.thermal_correlation(bloom_id);

        let chaos_score = (0.25 * volatility
            + 0.15 * mean
            + 0.15 * oscillation
            + 0.12 * acceleration
            + 0.12 * anomaly_rate
            + 0.21 * thermal_correlation.abs())
        .clamp(0.0, 1.0);

        debug!(
            bloom_id,
            mean, volatility, chaos_score, "entropy profile recomputed"
        );

        EntropyProfile {
            mean,
            variance,
            std_dev,
            trend,
            volatility,
            chaos_score,
            thermal_correlation,
            sample_count: values.len(),
        }
    }

    fn full_ring_anomaly_rate(&self, bloom_id: &str) -> f64 {
        let Some(ring) = self.rings.get(bloom_id) else {
            return 0.0;
        };
        if ring.len() < 3 {
            return 0.0;
        }

        let values: Vec<f64> = ring.iter().map(|s| s.entropy).collect();
        let (mean, std) = mean_std(&values);
        if std <= f64::EPSILON {
            return 0.0;
        }

        let outliers = values
            .iter()
            .filter(|v| ((**v - mean) / std).abs() >= ANOMALY_Z_THRESHOLD)
            .count();
        outliers as f64 / values.len() as f64
    }

    fn thermal_correlation(&self, bloom_id: &str) -> f64 {
        let Some(ring) = self.rings.get(bloom_id) else {
            return 0.0;
        };
        let n = ring.len().min(self.thermal.len()).min(self.window);
        if n < 3 {
            return 0.0;
        }

        let entropy_tail: Vec<f64> =
            ring.iter().skip(ring.len() - n).map(|s| s.entropy).collect();
        let heat_tail: Vec<f64> =
            self.thermal.iter().skip(self.thermal.len() - n).copied().collect();
        pearson(&entropy_tail, &heat_tail)
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        numerator += (x - x_mean) * (y - y_mean);
        denominator += (x - x_mean).powi(2);
    }

    if denominator != 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn sign_change_fraction(diffs: &[f64]) -> f64 {
    if diffs.len() < 2 {
        return 0.0;
    }
    let changes = diffs
        .windows(2)
        .filter(|w| w[0] * w[1] < 0.0)
        .count();
    changes as f64 / (diffs.len() - 1) as f64
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let n = a.len() as f64;
    if a.len() < 2 {
        return 0.0;
    }

    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }

    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return 0.0;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn analyzer() -> (EntropyAnalyzer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (EntropyAnalyzer::new(1000, 50, 0.7, clock.clone()), clock)
    }

    #[test]
    fn test_empty_ring_defaults() {
        let (analyzer, _clock) = analyzer();
        assert_eq!(analyzer.get_entropy_variance("missing"), 0.0);
        assert!(analyzer.profile("missing").is_none());
        assert!(analyzer.predict_entropy_future("missing", 5).is_empty());
        assert!(analyzer.get_entropy_phase_portrait("missing").is_empty());
    }

    #[test]
    fn test_add_sample_recomputes_profile() {
        let (mut analyzer, clock) = analyzer();

        for e in [0.2, 0.3, 0.4] {
            analyzer.add_sample("b1", e, "test").unwrap();
            clock.advance_secs(1);
        }

        let profile = analyzer.profile("b1").unwrap();
        assert!((profile.mean - 0.3).abs() < 1e-9);
        assert_eq!(profile.trend, Trend::Increasing);
        assert_eq!(profile.sample_count, 3);
        assert!(profile.chaos_score >= 0.0 && profile.chaos_score <= 1.0);
    }

    #[test]
    fn test_sample_validation() {
        let (mut analyzer, _clock) = analyzer();
        assert!(analyzer.add_sample("b1", 1.5, "test").is_err());
        assert!(analyzer.add_sample("b1", f64::NAN, "test").is_err());
        assert_eq!(analyzer.validation_rejects(), 2);
        assert_eq!(analyzer.ring_len("b1"), 0);
    }

    #[test]
    fn test_ring_is_bounded() {
        let clock = Arc::new(ManualClock::starting_now());
        let mut analyzer = EntropyAnalyzer::new(10, 5, 0.7, clock);

        for i in 0..50 {
            analyzer
                .add_sample("b1", (i % 10) as f64 / 10.0, "test")
                .unwrap();
        }
        assert_eq!(analyzer.ring_len("b1"), 10);
    }

    #[test]
    fn test_oscillating_trend() {
        let (mut analyzer, clock) = analyzer();

        for i in 0..20 {
            let e = if i % 2 == 0 { 0.2 } else { 0.8 };
            analyzer.add_sample("b1", e, "test").unwrap();
            clock.advance_secs(1);
        }

        let profile = analyzer.profile("b1").unwrap();
        assert_eq!(profile.trend, Trend::Oscillating);
        assert!(profile.volatility > 0.5);
    }

    #[test]
    fn test_hot_blooms_ordering() {
        let (mut analyzer, _clock) = analyzer();

        for _ in 0..5 {
            analyzer.add_sample("cool", 0.2, "test").unwrap();
            analyzer.add_sample("warm", 0.75, "test").unwrap();
            analyzer.add_sample("hot", 0.9, "test").unwrap();
        }

        let hot = analyzer.get_hot_blooms(0.7);
        assert_eq!(hot, vec!["hot".to_string(), "warm".to_string()]);
    }

    #[test]
    fn test_anomaly_detection() {
        let (mut analyzer, _clock) = analyzer();

        for _ in 0..30 {
            analyzer.add_sample("b1", 0.5, "test").unwrap();
        }
        analyzer.add_sample("b1", 1.0, "test").unwrap();

        let anomalies = analyzer.detect_entropy_anomalies("b1", 2.5);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].entropy, 1.0);
        assert!(anomalies[0].z_score > 2.5);
    }

    #[test]
    fn test_correlations_need_aligned_tails() {
        let (mut analyzer, _clock) = analyzer();

        for i in 0..10 {
            let e = i as f64 / 10.0;
            analyzer.add_sample("a", e, "test").unwrap();
            analyzer.add_sample("b", e, "test").unwrap();
            analyzer.add_sample("c", 1.0 - e, "test").unwrap();
        }

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let correlations = analyzer.get_entropy_correlations(&ids);

        let ab = correlations[&("a".to_string(), "b".to_string())];
        let ac = correlations[&("a".to_string(), "c".to_string())];
        assert!(ab > 0.99);
        assert!(ac < -0.99);
    }

    #[test]
    fn test_prediction_extrapolates_and_clamps() {
        let (mut analyzer, _clock) = analyzer();

        for i in 0..10 {
            analyzer.add_sample("b1", 0.5 + i as f64 * 0.05, "test").unwrap();
        }

        let future = analyzer.predict_entropy_future("b1", 20);
        assert_eq!(future.len(), 20);
        assert!(future[0] > 0.95);
        assert!(future.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(*future.last().unwrap(), 1.0);
    }

    #[test]
    fn test_thermal_correlation_feeds_chaos() {
        let (mut analyzer, _clock) = analyzer();

        // Entropy and heat rise together.
        for i in 0..20 {
            analyzer.inject_thermal_awareness(30.0 + i as f64 * 2.0);
            analyzer
                .add_sample("b1", (0.3 + i as f64 * 0.03).min(1.0), "test")
                .unwrap();
        }

        let profile = analyzer.profile("b1").unwrap();
        assert!(profile.thermal_correlation > 0.9);
    }

    #[test]
    fn test_stabilization_recommendations() {
        let clock = Arc::new(ManualClock::starting_now());
        let mut analyzer = EntropyAnalyzer::new(1000, 50, 0.6, clock.clone());

        // A violently oscillating, thermally coupled series scores high on
        // chaos; a steady one does not.
        for i in 0..40 {
            analyzer.inject_thermal_awareness(if i % 2 == 0 { 90.0 } else { 20.0 });
            let e = if i % 2 == 0 { 0.95 } else { 0.15 };
            analyzer.add_sample("wild", e, "test").unwrap();
            analyzer.add_sample("steady", 0.3, "test").unwrap();
            clock.advance_secs(1);
        }

        let alerts = analyzer.recommend_stabilization();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].bloom_id, "wild");
        assert!(alerts[0].chaos_score >= 0.6);
        assert!(!alerts[0].recommended_actions.is_empty());
    }

    #[test]
    fn test_tick_peak_tracks_max() {
        let (mut analyzer, _clock) = analyzer();

        analyzer.begin_tick();
        analyzer.add_sample("a", 0.4, "test").unwrap();
        analyzer.add_sample("b", 0.8, "test").unwrap();
        analyzer.add_sample("c", 0.6, "test").unwrap();

        let (id, peak) = analyzer.tick_peak().unwrap();
        assert_eq!(id, "b");
        assert_eq!(peak, 0.8);

        analyzer.begin_tick();
        assert!(analyzer.tick_peak().is_none());
    }
}
