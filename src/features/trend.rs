//! Temporal (trend) sub-analysis for a single source: OLS fit over the
//! observation index, moving averages, recent-versus-historical change, and
//! rolling volatility.

use serde::Serialize;

use crate::error::PipelineError;
use crate::stat::{self, LinRegress};

use super::{Significance, TrendDirection, MIN_TEMPORAL_POINTS};

#[derive(Debug, Clone, Serialize)]
pub struct TemporalInsights {
    pub trend: TrendSummary,
    pub moving_averages: MovingAverages,
    pub recent_change: RecentChange,
    pub volatility: Volatility,
}

/// OLS slope over x = 0..n with its strength and significance.
#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub direction: TrendDirection,
    pub slope: f64,
    pub r_squared: f64,
    pub p_value: f64,
    pub significance: Significance,
}

/// Latest trailing moving-average values. `None` when the series is shorter
/// than the window.
#[derive(Debug, Clone, Serialize)]
pub struct MovingAverages {
    pub ma_3: Option<f64>,
    pub ma_6: Option<f64>,
    pub ma_12: Option<f64>,
}

/// Mean of the most recent quarter of observations against the mean of the
/// rest, as a percentage change.
#[derive(Debug, Clone, Serialize)]
pub struct RecentChange {
    pub recent_mean: f64,
    pub historical_mean: f64,
    pub change_pct: f64,
    pub direction: TrendDirection,
}

/// Mean rolling-3 standard deviation, with the recent window compared against
/// the whole series to classify whether volatility is rising.
#[derive(Debug, Clone, Serialize)]
pub struct Volatility {
    pub overall: f64,
    pub recent: f64,
    pub trend: TrendDirection,
}

pub fn analyze(values: &[f64]) -> Result<TemporalInsights, PipelineError> {
    let n = values.len();
    if n < MIN_TEMPORAL_POINTS {
        return Err(PipelineError::DataInsufficient {
            analysis: "temporal",
            needed: MIN_TEMPORAL_POINTS,
            got: n,
        });
    }

    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let fit: LinRegress = stat::linregress(&x, values);
    let trend = TrendSummary {
        direction: TrendDirection::from_signed(fit.slope),
        slope: fit.slope,
        r_squared: fit.r_value * fit.r_value,
        p_value: fit.p_value,
        significance: Significance::from_p(fit.p_value),
    };

    let moving_averages = MovingAverages {
        ma_3: trailing_mean(values, 3),
        ma_6: trailing_mean(values, 6),
        ma_12: trailing_mean(values, 12),
    };

    let recent_len = (n / 4).max(1);
    let (historical, recent) = values.split_at(n - recent_len);
    let recent_mean = stat::mean(recent);
    let historical_mean = stat::mean(historical);
    let change_pct = if historical_mean != 0.0 {
        (recent_mean - historical_mean) / historical_mean * 100.0
    } else {
        0.0
    };
    let recent_change = RecentChange {
        recent_mean,
        historical_mean,
        change_pct,
        direction: TrendDirection::from_signed(change_pct),
    };

    let rolling = rolling_std(values, 3);
    let overall = stat::mean(&rolling);
    let recent_window = recent_len.min(rolling.len()).max(1);
    let recent_vol = stat::mean(&rolling[rolling.len() - recent_window..]);
    let volatility = Volatility {
        overall,
        recent: recent_vol,
        trend: TrendDirection::from_signed(recent_vol - overall),
    };

    Ok(TemporalInsights {
        trend,
        moving_averages,
        recent_change,
        volatility,
    })
}

fn trailing_mean(values: &[f64], window: usize) -> Option<f64> {
    if values.len() < window {
        return None;
    }
    Some(stat::mean(&values[values.len() - window..]))
}

/// Sample standard deviation over each full window of size `window`.
fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    if values.len() < window {
        return Vec::new();
    }
    (window..=values.len())
        .map(|end| crate::stat::std_dev(&values[end - window..end]))
        .collect()
}
