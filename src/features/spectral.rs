//! Frequency-domain sub-analysis. A plain DFT over the normalized series
//! yields the power spectrum; the top positive-frequency peaks are mapped to
//! calendar patterns and a signal-to-noise ratio summarizes spectrum quality.

use std::f64::consts::TAU;

use serde::Serialize;

use crate::error::PipelineError;
use crate::stat;

use super::MIN_FOURIER_POINTS;

#[derive(Debug, Clone, Serialize)]
pub struct FrequencyInsights {
    /// Up to five dominant peaks, strongest first, restricted to meaningful
    /// periods (at most half the series length).
    pub dominant_frequencies: Vec<FrequencyPeak>,
    pub signal_quality: SignalQuality,
    pub data_points_analyzed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrequencyPeak {
    pub frequency: f64,
    /// Period in observations (1 / frequency).
    pub period: f64,
    pub power: f64,
    pub pattern_type: PatternType,
    /// Power relative to the strongest positive-frequency bin.
    pub relative_strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    Annual,
    SemiAnnual,
    Quarterly,
    Monthly,
    Unknown,
}

impl PatternType {
    fn from_period(period: f64) -> Self {
        if (11.0..=13.0).contains(&period) {
            PatternType::Annual
        } else if (5.0..=7.0).contains(&period) {
            PatternType::SemiAnnual
        } else if (2.5..=4.0).contains(&period) {
            PatternType::Quarterly
        } else if (1.0..=2.0).contains(&period) {
            PatternType::Monthly
        } else {
            PatternType::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalQuality {
    pub total_power: f64,
    /// Power in the lower half of the positive-frequency bins.
    pub signal_power: f64,
    pub noise_power: f64,
    pub signal_to_noise_ratio: f64,
    pub quality_level: QualityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityLevel {
    fn from_snr(snr: f64) -> Self {
        if snr > 10.0 {
            QualityLevel::Excellent
        } else if snr > 5.0 {
            QualityLevel::Good
        } else if snr > 2.0 {
            QualityLevel::Fair
        } else {
            QualityLevel::Poor
        }
    }
}

pub fn analyze(values: &[f64]) -> Result<FrequencyInsights, PipelineError> {
    let n = values.len();
    if n < MIN_FOURIER_POINTS {
        return Err(PipelineError::DataInsufficient {
            analysis: "fourier",
            needed: MIN_FOURIER_POINTS,
            got: n,
        });
    }

    // Zero mean, unit variance. A constant series carries no spectrum.
    let m = stat::mean(values);
    let s = stat::std_dev(values);
    let normalized: Vec<f64> = if s == 0.0 {
        vec![0.0; n]
    } else {
        values.iter().map(|v| (v - m) / s).collect()
    };

    let power = power_spectrum(&normalized);

    // Positive frequencies: bins 1 ..= (n - 1) / 2.
    let last_positive = (n - 1) / 2;
    let positive: Vec<(f64, f64)> = (1..=last_positive)
        .map(|k| (k as f64 / n as f64, power[k]))
        .collect();
    let max_positive = positive
        .iter()
        .map(|(_, p)| *p)
        .fold(0.0_f64, f64::max);

    let mut ranked: Vec<(f64, f64)> = positive.clone();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let dominant_frequencies: Vec<FrequencyPeak> = ranked
        .iter()
        .take(5)
        .filter_map(|(freq, p)| {
            let period = 1.0 / freq;
            if period > 0.0 && period <= n as f64 / 2.0 {
                Some(FrequencyPeak {
                    frequency: *freq,
                    period,
                    power: *p,
                    pattern_type: PatternType::from_period(period),
                    relative_strength: if max_positive > 0.0 { p / max_positive } else { 0.0 },
                })
            } else {
                None
            }
        })
        .collect();

    let total_power: f64 = power.iter().sum();
    let signal_power: f64 = positive[..positive.len() / 2].iter().map(|(_, p)| p).sum();
    let noise_power = total_power - signal_power;
    let snr = if noise_power > 0.0 {
        signal_power / noise_power
    } else if signal_power > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    Ok(FrequencyInsights {
        dominant_frequencies,
        signal_quality: SignalQuality {
            total_power,
            signal_power,
            noise_power,
            signal_to_noise_ratio: snr,
            quality_level: QualityLevel::from_snr(snr),
        },
        data_points_analyzed: n,
    })
}

/// |X_k|^2 for every bin of the discrete Fourier transform. O(n^2), fine at
/// the monthly series lengths this pipeline sees.
fn power_spectrum(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|k| {
            let mut re = 0.0;
            let mut im = 0.0;
            for (j, v) in x.iter().enumerate() {
                let angle = TAU * k as f64 * j as f64 / n as f64;
                re += v * angle.cos();
                im -= v * angle.sin();
            }
            re * re + im * im
        })
        .collect()
}
