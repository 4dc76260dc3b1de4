//! Investigator
//!
//! Given one flagged anomaly's type tag, runs a deeper, anomaly-specific
//! query sequence and makes a binary root-cause call per type. This is a
//! deterministic decision table: every branch compares one diagnostic
//! aggregate against a fixed threshold, and the thresholds are the same
//! configured constants the detector uses.
//!
//! Unknown tags produce `None`, not an error: the caller shows "nothing to
//! investigate" and moves on.

use crate::alerts::{last_two, AlertKind};
use crate::config::Thresholds;
use crate::metrics::{ratio, Metrics};
use crate::store::TABLE;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Outcome of one investigation: a root-cause call, the findings that
/// support it, and a seed for the recommendation prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub kind: AlertKind,
    pub root_cause: String,
    pub findings: Vec<String>,
    pub prompt_seed: String,
}

impl fmt::Display for Investigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Investigation: {}", self.kind.tag())?;
        writeln!(f, "Root cause: {}", self.root_cause)?;
        writeln!(f, "Findings:")?;
        for finding in &self.findings {
            writeln!(f, "  - {}", finding)?;
        }
        Ok(())
    }
}

pub struct Investigator {
    metrics: Metrics,
    thresholds: Thresholds,
}

impl Investigator {
    pub fn new(metrics: Metrics, thresholds: Thresholds) -> Self {
        Self { metrics, thresholds }
    }

    /// Dispatch on the alert-type tag. `now` feeds only the slow-ramp
    /// diagnostics (wall-clock tenure, same as the detector).
    pub fn investigate(&self, tag: &str, now: NaiveDate) -> Option<Investigation> {
        let kind = AlertKind::from_tag(tag)?;
        info!("investigating {}", tag);
        match kind {
            AlertKind::WinRateDecline => self.win_rate_decline(),
            AlertKind::PipelineCoverage => self.pipeline_coverage(),
            AlertKind::CycleLengthening => self.cycle_lengthening(),
            AlertKind::RepConcentration => self.rep_concentration(),
            AlertKind::ProductImbalance => self.product_imbalance(),
            AlertKind::StuckPipeline => self.stuck_pipeline(),
            AlertKind::TerritoryImbalance => self.territory_imbalance(),
            AlertKind::SlowRamp => self.slow_ramp(now),
            AlertKind::DiscountFrequency => self.discount_frequency(),
            AlertKind::SeasonalDrop => self.seasonal_drop(),
        }
    }

    fn build(&self, kind: AlertKind, root_cause: String, findings: Vec<String>) -> Investigation {
        let prompt_seed = format!(
            "A revenue diagnostic flagged '{}'. Root cause call: {}. Supporting findings: {}. \
             Recommend three concrete actions a sales leader should take this week.",
            kind.tag(),
            root_cause,
            findings.join(" | ")
        );
        Investigation {
            kind,
            root_cause,
            findings,
            prompt_seed,
        }
    }

    /// Win-rate decline: are we losing disproportionately large deals, or
    /// converting worse across the board? Decided by comparing the recent
    /// quarter's average lost value to its average won value (1.3x).
    fn win_rate_decline(&self) -> Option<Investigation> {
        let quarters = self.metrics.quarterly_win_rates();
        let [prev, last] = last_two(&quarters)?;

        let quarter = self
            .metrics
            .store()
            .dialect()
            .quarter_of("close_date");
        let row = self
            .metrics
            .store()
            .query(&format!(
                "SELECT AVG(CASE WHEN deal_stage = 'Won' THEN close_value END),
                        AVG(CASE WHEN deal_stage = 'Lost' THEN close_value END),
                        SUM(CASE WHEN deal_stage = 'Lost' THEN 1 ELSE 0 END)
                 FROM {TABLE}
                 WHERE close_date IS NOT NULL AND {quarter} = '{period}'",
                period = last.period
            ))?
            .into_iter()
            .next()?;
        let avg_won = row[0].as_f64();
        let avg_lost = row[1].as_f64();
        let lost_count = row[2].as_i64();

        let upmarket = avg_won > 0.0 && avg_lost > avg_won * self.thresholds.churn_value_multiple;
        let root_cause = if upmarket {
            "Losing disproportionately large deals - competitive pressure upmarket".to_string()
        } else {
            "Broad conversion decline across deal sizes".to_string()
        };

        let findings = vec![
            format!(
                "Win rate moved from {:.1}% ({}) to {:.1}% ({}).",
                prev.value, prev.period, last.value, last.period
            ),
            format!("{} deals lost in {}.", lost_count, last.period),
            format!(
                "Average lost-deal value ${:.0} vs average won-deal value ${:.0} in {}.",
                avg_lost, avg_won, last.period
            ),
        ];
        Some(self.build(AlertKind::WinRateDecline, root_cause, findings))
    }

    /// Coverage shortfall: is the pipeline stalled (old open deals) or
    /// thin (not enough new prospecting)? Decided by average open-deal age
    /// against 1.15x the average won cycle.
    fn pipeline_coverage(&self) -> Option<Investigation> {
        let coverage = self.metrics.pipeline_coverage();
        let open = self.metrics.open_pipeline();
        let monthly = self.metrics.monthly_revenue();
        if monthly == 0.0 {
            return None;
        }

        let ages = self.metrics.open_deal_ages();
        let avg_age = if ages.is_empty() {
            0.0
        } else {
            ages.iter().sum::<i64>() as f64 / ages.len() as f64
        };
        let avg_cycle = self
            .metrics
            .sales_cycle()
            .map(|c| c.avg_days)
            .unwrap_or(0.0);

        let stalled =
            avg_cycle > 0.0 && avg_age > avg_cycle * self.thresholds.coverage_age_multiple;
        let root_cause = if stalled {
            "Stalled pipeline - open deals are aging past the normal cycle".to_string()
        } else {
            "Insufficient new prospecting - not enough deals entering the pipeline".to_string()
        };

        let findings = vec![
            format!("Pipeline coverage at {:.1}x monthly revenue.", coverage),
            format!(
                "{} open deals, estimated value ${:.0}.",
                open.count,
                self.metrics.estimated_pipeline_value()
            ),
            format!("Monthly revenue run-rate ${:.0}.", monthly),
            format!(
                "Average open-deal age {:.0} days vs {:.0}-day average won cycle.",
                avg_age, avg_cycle
            ),
        ];
        Some(self.build(AlertKind::PipelineCoverage, root_cause, findings))
    }

    /// Cycle lengthening: bigger deals, or the same deals moving slower?
    /// Decided by the recent month's average won value against 1.3x the
    /// prior month's.
    fn cycle_lengthening(&self) -> Option<Investigation> {
        let months = self.metrics.monthly_cycle();
        let [prev, last] = last_two(&months)?;

        let month = self.metrics.store().dialect().month_of("close_date");
        let avg_value_for = |period: &str| -> Option<f64> {
            self.metrics
                .store()
                .query(&format!(
                    "SELECT COALESCE(AVG(close_value), 0) FROM {TABLE}
                     WHERE deal_stage = 'Won' AND {month} = '{period}'"
                ))?
                .into_iter()
                .next()
                .map(|r| r[0].as_f64())
        };
        let prev_avg = avg_value_for(&prev.period)?;
        let last_avg = avg_value_for(&last.period)?;

        let complexity =
            prev_avg > 0.0 && last_avg > prev_avg * self.thresholds.churn_value_multiple;
        let root_cause = if complexity {
            "Deal complexity - recent closes are materially larger deals".to_string()
        } else {
            "Process slowdown - same deal profile, longer handling time".to_string()
        };

        let findings = vec![
            format!(
                "Average cycle grew from {:.0} days ({}) to {:.0} days ({}).",
                prev.value, prev.period, last.value, last.period
            ),
            format!(
                "Average won value ${:.0} in {} vs ${:.0} in {}.",
                last_avg, last.period, prev_avg, prev.period
            ),
            format!("{} deals closed in {}.", last.count, last.period),
        ];
        Some(self.build(AlertKind::CycleLengthening, root_cause, findings))
    }

    /// Rep concentration: is the tail closing smaller deals, or closing
    /// fewer of them? Decided by the bottom half's average deal size being
    /// more than 25% below the top half's.
    fn rep_concentration(&self) -> Option<Investigation> {
        let reps = self.metrics.revenue_by_rep();
        if reps.len() < 2 {
            return None;
        }
        let mid = reps.len() / 2;
        let (top_half, bottom_half) = reps.split_at(mid.max(1));
        let avg_deal = |slice: &[crate::metrics::RepRevenue]| {
            let deals: i64 = slice.iter().map(|r| r.deals).sum();
            let value: f64 = slice.iter().map(|r| r.value).sum();
            ratio(value, deals as f64)
        };
        let top_avg = avg_deal(top_half);
        let bottom_avg = avg_deal(bottom_half);

        let size_gap = top_avg > 0.0
            && bottom_avg < top_avg * (1.0 - self.thresholds.rep_deal_size_gap_frac);
        let root_cause = if size_gap {
            "Deal-size gap - tail reps close materially smaller deals".to_string()
        } else {
            "Activity gap - tail reps close too few deals".to_string()
        };

        let mean = reps.iter().map(|r| r.value).sum::<f64>() / reps.len() as f64;
        let above = reps.iter().filter(|r| r.value > mean).count();
        let findings = vec![
            format!(
                "{} of {} reps earn above the ${:.0} mean revenue per rep.",
                above,
                reps.len(),
                mean
            ),
            format!(
                "Top-half average deal size ${:.0} vs bottom-half ${:.0}.",
                top_avg, bottom_avg
            ),
            format!(
                "Top rep: {} at ${:.0}; bottom rep: {} at ${:.0}.",
                reps.first()?.agent,
                reps.first()?.value,
                reps.last()?.agent,
                reps.last()?.value
            ),
        ];
        Some(self.build(AlertKind::RepConcentration, root_cause, findings))
    }

    /// Product imbalance: is the runner-up product converting badly, or
    /// just not being worked? Decided by its win rate sitting more than
    /// 25% below the leader's.
    fn product_imbalance(&self) -> Option<Investigation> {
        let products = self.metrics.product_revenue();
        if products.len() < 2 {
            return None;
        }
        let (top, second) = (&products[0], &products[1]);

        let win_rate_for = |product: &str| -> Option<(f64, i64)> {
            let row = self
                .metrics
                .store()
                .query(&format!(
                    "SELECT 100.0 * SUM(CASE WHEN deal_stage = 'Won' THEN 1 ELSE 0 END) / COUNT(*),
                            COUNT(*)
                     FROM {TABLE}
                     WHERE deal_stage IN ('Won', 'Lost') AND product = '{product}'"
                ))?
                .into_iter()
                .next()?;
            if row[1].as_i64() == 0 {
                return None;
            }
            Some((row[0].as_f64(), row[1].as_i64()))
        };
        let (top_rate, top_attempts) = win_rate_for(&top.product)?;
        let (second_rate, second_attempts) = win_rate_for(&second.product)?;

        let conversion_gap = top_rate > 0.0
            && second_rate < top_rate * (1.0 - self.thresholds.product_conversion_gap_frac);
        let root_cause = if conversion_gap {
            format!(
                "Conversion problem - {} wins far less often than {}",
                second.product, top.product
            )
        } else {
            format!(
                "Focus problem - {} is barely being worked despite converting",
                second.product
            )
        };

        let findings = vec![
            format!(
                "{} revenue ${:.0} vs {} revenue ${:.0}.",
                top.product, top.value, second.product, second.value
            ),
            format!(
                "{}: {:.1}% win rate over {} closed deals.",
                top.product, top_rate, top_attempts
            ),
            format!(
                "{}: {:.1}% win rate over {} closed deals.",
                second.product, second_rate, second_attempts
            ),
        ];
        Some(self.build(AlertKind::ProductImbalance, root_cause, findings))
    }

    /// Stuck pipeline: deal complexity vs pipeline hygiene, decided by the
    /// stuck deals' average recorded value against 1.3x the average across
    /// all open deals.
    fn stuck_pipeline(&self) -> Option<Investigation> {
        let reference = self.metrics.reference_date()?;
        let age = self
            .metrics
            .store()
            .dialect()
            .datediff(&format!("'{reference}'"), "engage_date");
        let row = self
            .metrics
            .store()
            .query(&format!(
                "SELECT COUNT(*),
                        SUM(CASE WHEN {age} > {stuck} THEN 1 ELSE 0 END),
                        COALESCE(AVG(CASE WHEN {age} > {stuck} THEN close_value END), 0),
                        COALESCE(AVG(close_value), 0)
                 FROM {TABLE}
                 WHERE deal_stage = 'Engaging' AND engage_date IS NOT NULL",
                stuck = self.thresholds.stuck_days
            ))?
            .into_iter()
            .next()?;

        let open_count = row[0].as_i64();
        if open_count == 0 {
            return None;
        }
        let stuck_count = row[1].as_i64();
        let stuck_avg = row[2].as_f64();
        let open_avg = row[3].as_f64();

        let complexity =
            open_avg > 0.0 && stuck_avg > open_avg * self.thresholds.churn_value_multiple;
        let root_cause = if complexity {
            "Deal complexity - the stuck deals are the big ones".to_string()
        } else {
            "Pipeline hygiene - stale deals nobody has closed out".to_string()
        };

        let findings = vec![
            format!(
                "{} of {} open deals older than {} days.",
                stuck_count, open_count, self.thresholds.stuck_days
            ),
            format!(
                "Stuck-deal average recorded value ${:.0} vs ${:.0} across all open deals.",
                stuck_avg, open_avg
            ),
            format!("Reference date {}.", reference),
        ];
        Some(self.build(AlertKind::StuckPipeline, root_cause, findings))
    }

    /// Territory imbalance: capacity overwhelm vs cherry-picking, decided
    /// by counting high-load reps that are also high-revenue against
    /// high-load reps that are not. Ties go to capacity overwhelm.
    fn territory_imbalance(&self) -> Option<Investigation> {
        let loads = self.metrics.rep_open_loads();
        if loads.is_empty() {
            return None;
        }
        let revenue = self.metrics.revenue_by_rep();
        let mean_load =
            loads.iter().map(|l| l.open_deals).sum::<i64>() as f64 / loads.len() as f64;
        let mean_revenue = if revenue.is_empty() {
            0.0
        } else {
            revenue.iter().map(|r| r.value).sum::<f64>() / revenue.len() as f64
        };
        let revenue_of = |agent: &str| {
            revenue
                .iter()
                .find(|r| r.agent == agent)
                .map(|r| r.value)
                .unwrap_or(0.0)
        };

        let high_load: Vec<_> = loads
            .iter()
            .filter(|l| l.open_deals as f64 > mean_load)
            .collect();
        if high_load.is_empty() {
            return None;
        }
        let high_rev = high_load
            .iter()
            .filter(|l| revenue_of(&l.agent) > mean_revenue)
            .count();
        let low_rev = high_load.len() - high_rev;

        let root_cause = if high_rev >= low_rev {
            "Capacity overwhelm - top producers are carrying the load".to_string()
        } else {
            "Cherry-picking - heavy loads sit with reps who are not converting them".to_string()
        };

        let heaviest = loads.first()?;
        let lightest = loads.last()?;
        let findings = vec![
            format!(
                "{} high-load reps above the mean of {:.1} open deals; {} of them are high-revenue.",
                high_load.len(),
                mean_load,
                high_rev
            ),
            format!(
                "Heaviest: {} with {} open deals (${:.0} won); lightest: {} with {} (${:.0} won).",
                heaviest.agent,
                heaviest.open_deals,
                revenue_of(&heaviest.agent),
                lightest.agent,
                lightest.open_deals,
                revenue_of(&lightest.agent)
            ),
        ];
        Some(self.build(AlertKind::TerritoryImbalance, root_cause, findings))
    }

    /// Slow ramp: upmarket assignment vs onboarding gap, decided by the
    /// slowest new rep's average deal size against 1.3x the company
    /// average won value.
    fn slow_ramp(&self, now: NaiveDate) -> Option<Investigation> {
        let ramps = self.metrics.rep_ramp(now);
        let wins: Vec<i64> = ramps.iter().filter_map(|r| r.days_to_first_win).collect();
        if wins.is_empty() {
            return None;
        }
        let avg_ramp = wins.iter().sum::<i64>() as f64 / wins.len() as f64;

        let slowest = ramps
            .iter()
            .filter(|r| r.tenure_days < self.thresholds.new_rep_days)
            .filter(|r| r.days_to_first_win.is_some())
            .sorted_by_key(|r| std::cmp::Reverse(r.days_to_first_win))
            .next()?;
        let slow_days = slowest.days_to_first_win?;

        let company_avg = self.metrics.avg_won_deal_value();
        let rep_avg = self
            .metrics
            .revenue_by_rep()
            .into_iter()
            .find(|r| r.agent == slowest.agent)
            .map(|r| r.avg_deal)
            .unwrap_or(0.0);

        let upmarket =
            company_avg > 0.0 && rep_avg > company_avg * self.thresholds.churn_value_multiple;
        let root_cause = if upmarket {
            format!(
                "Upmarket assignment - {} works larger deals that naturally ramp slower",
                slowest.agent
            )
        } else {
            format!("Onboarding gap - {} needs coaching support", slowest.agent)
        };

        let findings = vec![
            format!(
                "{} took {} days to a first win; team average is {:.0} days.",
                slowest.agent, slow_days, avg_ramp
            ),
            format!(
                "{} has {} days of tenure (new-rep cutoff {}).",
                slowest.agent, slowest.tenure_days, self.thresholds.new_rep_days
            ),
            format!(
                "Average deal size ${:.0} vs ${:.0} company average.",
                rep_avg, company_avg
            ),
        ];
        Some(self.build(AlertKind::SlowRamp, root_cause, findings))
    }

    /// Discount frequency: single-rep discipline vs systemic pricing
    /// pressure, decided by whether the top discounter accounts for more
    /// than half of the discounted deals.
    fn discount_frequency(&self) -> Option<Investigation> {
        let stats = self.metrics.recent_discount_share(
            self.thresholds.discount_window_days,
            self.thresholds.discount_depth_frac,
        )?;
        if stats.discounted == 0 {
            return None;
        }

        let reference = self.metrics.reference_date()?;
        let floor = stats.historical_avg_value * (1.0 - self.thresholds.discount_depth_frac);
        let window_start = self
            .metrics
            .store()
            .dialect()
            .days_before(&format!("'{reference}'"), self.thresholds.discount_window_days);
        let by_rep = self
            .metrics
            .store()
            .query(&format!(
                "SELECT sales_agent, COUNT(*) FROM {TABLE}
                 WHERE deal_stage = 'Won'
                   AND close_value > 0 AND close_value < {floor}
                   AND close_date >= {window_start}
                 GROUP BY sales_agent
                 ORDER BY COUNT(*) DESC"
            ))?;
        let top = by_rep.first()?;
        let top_agent = top[0].as_str().to_string();
        let top_count = top[1].as_i64();
        let top_share = ratio(top_count as f64, stats.discounted as f64);

        let single_rep = top_share > self.thresholds.discount_single_rep_share;
        let root_cause = if single_rep {
            format!("Discount discipline - {} drives most of the discounting", top_agent)
        } else {
            "Systemic pricing pressure across the team".to_string()
        };

        let findings = vec![
            format!(
                "{} of {} recent closes ({:.0}%) priced below ${:.0}.",
                stats.discounted,
                stats.recent_closed,
                stats.share * 100.0,
                floor
            ),
            format!(
                "{} holds {} of the {} discounted deals ({:.0}%).",
                top_agent,
                top_count,
                stats.discounted,
                top_share * 100.0
            ),
            format!(
                "Historical average deal value ${:.0}.",
                stats.historical_avg_value
            ),
        ];
        Some(self.build(AlertKind::DiscountFrequency, root_cause, findings))
    }

    /// Seasonal drop: volume-driven vs deal-size-driven, decided by the
    /// recent quarter's won-deal count falling more than 25% below the
    /// prior quarter's.
    fn seasonal_drop(&self) -> Option<Investigation> {
        let quarters = self.metrics.quarterly_revenue();
        let [prev, last] = last_two(&quarters)?;
        if prev.count == 0 {
            return None;
        }

        let count_drop = 1.0 - ratio(last.count as f64, prev.count as f64);
        let volume_driven = count_drop > self.thresholds.seasonal_volume_drop_frac;
        let root_cause = if volume_driven {
            "Volume-driven decline - fewer deals closed".to_string()
        } else {
            "Deal-size-driven decline - similar volume, smaller deals".to_string()
        };

        let prev_avg = ratio(prev.value, prev.count as f64);
        let last_avg = ratio(last.value, last.count as f64);
        let findings = vec![
            format!(
                "Revenue ${:.0} in {} vs ${:.0} in {}.",
                last.value, last.period, prev.value, prev.period
            ),
            format!(
                "Won deals: {} in {} vs {} in {} ({:.0}% change in volume).",
                last.count,
                last.period,
                prev.count,
                prev.period,
                -count_drop * 100.0
            ),
            format!(
                "Average deal size ${:.0} in {} vs ${:.0} in {}.",
                last_avg, last.period, prev_avg, prev.period
            ),
        ];
        Some(self.build(AlertKind::SeasonalDrop, root_cause, findings))
    }
}
