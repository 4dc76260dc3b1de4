//! Alert Detector
//!
//! Ten independent threshold rules over the metric calculators. The
//! detector is a pure function of the current dataset and the configured
//! thresholds: nothing is cached, every call re-queries the live store, so
//! admin-panel mutations show up on the next poll. A rule that lacks the
//! data it needs (fewer than two periods, zero reps) silently does not
//! fire.

use crate::config::Thresholds;
use crate::metrics::Metrics;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// The ten anomaly kinds. The string tag is the stable identifier the
/// investigator dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    WinRateDecline,
    PipelineCoverage,
    CycleLengthening,
    RepConcentration,
    ProductImbalance,
    StuckPipeline,
    TerritoryImbalance,
    SlowRamp,
    DiscountFrequency,
    SeasonalDrop,
}

impl AlertKind {
    pub const ALL: [AlertKind; 10] = [
        AlertKind::WinRateDecline,
        AlertKind::PipelineCoverage,
        AlertKind::CycleLengthening,
        AlertKind::RepConcentration,
        AlertKind::ProductImbalance,
        AlertKind::StuckPipeline,
        AlertKind::TerritoryImbalance,
        AlertKind::SlowRamp,
        AlertKind::DiscountFrequency,
        AlertKind::SeasonalDrop,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            AlertKind::WinRateDecline => "win_rate_decline",
            AlertKind::PipelineCoverage => "pipeline_coverage",
            AlertKind::CycleLengthening => "cycle_lengthening",
            AlertKind::RepConcentration => "rep_concentration",
            AlertKind::ProductImbalance => "product_imbalance",
            AlertKind::StuckPipeline => "stuck_pipeline",
            AlertKind::TerritoryImbalance => "territory_imbalance",
            AlertKind::SlowRamp => "slow_ramp",
            AlertKind::DiscountFrequency => "discount_frequency",
            AlertKind::SeasonalDrop => "seasonal_drop",
        }
    }

    /// Parse a tag; unknown tags map to None rather than an error, which
    /// is how the investigator treats unrecognized input.
    pub fn from_tag(tag: &str) -> Option<AlertKind> {
        AlertKind::ALL.iter().copied().find(|k| k.tag() == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

/// Evaluates every rule against fresh metric queries.
pub struct AlertDetector {
    metrics: Metrics,
    thresholds: Thresholds,
}

impl AlertDetector {
    pub fn new(metrics: Metrics, thresholds: Thresholds) -> Self {
        Self { metrics, thresholds }
    }

    /// Run all ten rules. `now` feeds only the slow-ramp rule, whose rep
    /// tenure follows the wall clock (see `Metrics::rep_ramp`).
    pub fn detect(&self, now: NaiveDate) -> Vec<Alert> {
        let checks = [
            self.win_rate_decline(),
            self.pipeline_coverage(),
            self.cycle_lengthening(),
            self.rep_concentration(),
            self.product_imbalance(),
            self.stuck_pipeline(),
            self.territory_imbalance(),
            self.slow_ramp(now),
            self.discount_frequency(),
            self.seasonal_drop(),
        ];
        let alerts: Vec<Alert> = checks.into_iter().flatten().collect();
        debug!("alert sweep produced {} alerts", alerts.len());
        alerts
    }

    /// Most recent quarter's win rate dropped at least N points below the
    /// prior quarter.
    fn win_rate_decline(&self) -> Option<Alert> {
        let quarters = self.metrics.quarterly_win_rates();
        let [prev, last] = last_two(&quarters)?;
        let drop = prev.value - last.value;
        if drop < self.thresholds.win_rate_decline_pts {
            return None;
        }
        Some(Alert {
            kind: AlertKind::WinRateDecline,
            severity: Severity::Critical,
            title: "Win rate declining".to_string(),
            message: format!(
                "Win rate fell from {:.1}% in {} to {:.1}% in {} ({:.1} pts).",
                prev.value, prev.period, last.value, last.period, drop
            ),
        })
    }

    /// Estimated pipeline below N months of revenue. Fires even at zero
    /// coverage (an empty pipeline is the worst case), as long as there is
    /// revenue history to measure against.
    fn pipeline_coverage(&self) -> Option<Alert> {
        if self.metrics.monthly_revenue() == 0.0 {
            return None;
        }
        let coverage = self.metrics.pipeline_coverage();
        if coverage >= self.thresholds.coverage_warn_multiple {
            return None;
        }
        let severity = if coverage < self.thresholds.coverage_critical_multiple {
            Severity::Critical
        } else {
            Severity::Warning
        };
        Some(Alert {
            kind: AlertKind::PipelineCoverage,
            severity,
            title: "Pipeline coverage below target".to_string(),
            message: format!(
                "Pipeline covers {:.1}x monthly revenue (target {:.1}x).",
                coverage, self.thresholds.coverage_warn_multiple
            ),
        })
    }

    /// Most recent month's average close cycle ran >N% longer than the
    /// prior month's.
    fn cycle_lengthening(&self) -> Option<Alert> {
        let months = self.metrics.monthly_cycle();
        let [prev, last] = last_two(&months)?;
        if prev.value <= 0.0 {
            return None;
        }
        let growth = last.value / prev.value - 1.0;
        if growth <= self.thresholds.cycle_lengthening_frac {
            return None;
        }
        Some(Alert {
            kind: AlertKind::CycleLengthening,
            severity: Severity::Warning,
            title: "Sales cycle lengthening".to_string(),
            message: format!(
                "Average close cycle grew from {:.0} days ({}) to {:.0} days ({}), +{:.0}%.",
                prev.value,
                prev.period,
                last.value,
                last.period,
                growth * 100.0
            ),
        })
    }

    /// Fewer than N% of reps earn above the mean revenue per rep. Needs at
    /// least two reps, a one-rep team is always "concentrated".
    fn rep_concentration(&self) -> Option<Alert> {
        let reps = self.metrics.revenue_by_rep();
        if reps.len() < 2 {
            return None;
        }
        let mean = reps.iter().map(|r| r.value).sum::<f64>() / reps.len() as f64;
        let above = reps.iter().filter(|r| r.value > mean).count();
        let share = above as f64 / reps.len() as f64;
        if share >= self.thresholds.rep_concentration_share {
            return None;
        }
        Some(Alert {
            kind: AlertKind::RepConcentration,
            severity: Severity::Critical,
            title: "Revenue concentrated in few reps".to_string(),
            message: format!(
                "Only {} of {} reps ({:.0}%) earn above the mean revenue per rep.",
                above,
                reps.len(),
                share * 100.0
            ),
        })
    }

    /// Top product's revenue more than N times the second product's.
    fn product_imbalance(&self) -> Option<Alert> {
        let products = self.metrics.product_revenue();
        if products.len() < 2 {
            return None;
        }
        let (top, second) = (&products[0], &products[1]);
        if top.value <= second.value * self.thresholds.product_imbalance_multiple {
            return None;
        }
        Some(Alert {
            kind: AlertKind::ProductImbalance,
            severity: Severity::Warning,
            title: "Product revenue imbalance".to_string(),
            message: format!(
                "{} (${:.0}) brings in more than {:.0}x the revenue of {} (${:.0}).",
                top.product,
                top.value,
                self.thresholds.product_imbalance_multiple,
                second.product,
                second.value
            ),
        })
    }

    /// More than N% of open deals have been open longer than the stuck
    /// cutoff, relative to the reference date.
    fn stuck_pipeline(&self) -> Option<Alert> {
        let ages = self.metrics.open_deal_ages();
        if ages.is_empty() {
            return None;
        }
        let stuck = ages
            .iter()
            .filter(|a| **a > self.thresholds.stuck_days)
            .count();
        let share = stuck as f64 / ages.len() as f64;
        if share <= self.thresholds.stuck_share {
            return None;
        }
        Some(Alert {
            kind: AlertKind::StuckPipeline,
            severity: Severity::Warning,
            title: "Pipeline going stale".to_string(),
            message: format!(
                "{} of {} open deals ({:.0}%) have been open more than {} days.",
                stuck,
                ages.len(),
                share * 100.0,
                self.thresholds.stuck_days
            ),
        })
    }

    /// Most-loaded rep carries more than N times the open deals of the
    /// least-loaded rep. Only evaluated once enough reps have open deals.
    fn territory_imbalance(&self) -> Option<Alert> {
        let loads = self.metrics.rep_open_loads();
        if (loads.len() as i64) < self.thresholds.territory_min_reps {
            return None;
        }
        let top = loads.first()?;
        let bottom = loads.last()?;
        if bottom.open_deals <= 0 {
            return None;
        }
        if top.open_deals as f64 <= bottom.open_deals as f64 * self.thresholds.territory_multiple {
            return None;
        }
        Some(Alert {
            kind: AlertKind::TerritoryImbalance,
            severity: Severity::Warning,
            title: "Territory load imbalance".to_string(),
            message: format!(
                "{} carries {} open deals while {} carries {}.",
                top.agent, top.open_deals, bottom.agent, bottom.open_deals
            ),
        })
    }

    /// A new rep (active under the tenure cutoff) took more than N times
    /// the average time-to-first-win.
    fn slow_ramp(&self, now: NaiveDate) -> Option<Alert> {
        let ramps = self.metrics.rep_ramp(now);
        let wins: Vec<i64> = ramps.iter().filter_map(|r| r.days_to_first_win).collect();
        if wins.is_empty() {
            return None;
        }
        let avg = wins.iter().sum::<i64>() as f64 / wins.len() as f64;
        if avg <= 0.0 {
            return None;
        }
        let slow = ramps.iter().find(|r| {
            r.tenure_days < self.thresholds.new_rep_days
                && r.days_to_first_win
                    .map(|d| d as f64 > avg * self.thresholds.ramp_multiple)
                    .unwrap_or(false)
        })?;
        Some(Alert {
            kind: AlertKind::SlowRamp,
            severity: Severity::Warning,
            title: "New rep ramping slowly".to_string(),
            message: format!(
                "{} took {} days to a first win against a {:.0}-day average.",
                slow.agent,
                slow.days_to_first_win.unwrap_or(0),
                avg
            ),
        })
    }

    /// More than N% of recently closed won deals priced materially below
    /// the historical average deal value.
    fn discount_frequency(&self) -> Option<Alert> {
        let stats = self.metrics.recent_discount_share(
            self.thresholds.discount_window_days,
            self.thresholds.discount_depth_frac,
        )?;
        if stats.recent_closed == 0 {
            return None;
        }
        if stats.share <= self.thresholds.discount_share {
            return None;
        }
        Some(Alert {
            kind: AlertKind::DiscountFrequency,
            severity: Severity::Critical,
            title: "Heavy discounting".to_string(),
            message: format!(
                "{} of {} deals closed in the last {} days ({:.0}%) priced more than {:.0}% below the ${:.0} historical average.",
                stats.discounted,
                stats.recent_closed,
                self.thresholds.discount_window_days,
                stats.share * 100.0,
                self.thresholds.discount_depth_frac * 100.0,
                stats.historical_avg_value
            ),
        })
    }

    /// Most recent quarter's revenue under N% of the prior quarter's.
    fn seasonal_drop(&self) -> Option<Alert> {
        let quarters = self.metrics.quarterly_revenue();
        let [prev, last] = last_two(&quarters)?;
        if prev.value <= 0.0 {
            return None;
        }
        if last.value >= prev.value * self.thresholds.seasonal_drop_frac {
            return None;
        }
        Some(Alert {
            kind: AlertKind::SeasonalDrop,
            severity: Severity::Critical,
            title: "Quarterly revenue drop".to_string(),
            message: format!(
                "Revenue fell from ${:.0} in {} to ${:.0} in {}.",
                prev.value, prev.period, last.value, last.period
            ),
        })
    }
}

/// The last two points of an ascending series, if it has at least two.
pub(crate) fn last_two<T>(series: &[T]) -> Option<[&T; 2]> {
    if series.len() < 2 {
        return None;
    }
    Some([&series[series.len() - 2], &series[series.len() - 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_tags_round_trip() {
        for kind in AlertKind::ALL {
            assert_eq!(AlertKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(AlertKind::from_tag("not_a_kind"), None);
        assert_eq!(AlertKind::from_tag(""), None);
    }

    #[test]
    fn last_two_requires_two_periods() {
        let empty: Vec<i32> = vec![];
        assert!(last_two(&empty).is_none());
        assert!(last_two(&[1]).is_none());
        let [a, b] = last_two(&[1, 2, 3]).unwrap();
        assert_eq!((*a, *b), (2, 3));
    }
}
