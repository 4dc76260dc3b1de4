//! Metric Calculators
//!
//! A fixed set of aggregate queries over the opportunity table, each
//! returning a small record of derived numbers. Two conventions hold
//! everywhere:
//!
//! - Every ratio guards the zero-denominator case and yields 0 instead of
//!   failing. The dataset is mutated live by the admin panel, so empty
//!   slices are normal, not exceptional.
//! - Time-based metrics derive their "now" from the maximum close date in
//!   the dataset (the reference date), not the wall clock. The data is
//!   historical; projecting from the real current date silently produces
//!   wrong numbers. The one exception is rep tenure in
//!   [`Metrics::rep_ramp`], which stays on the wall clock behind an
//!   injected `now` parameter.

use crate::store::{SqlDialect, Store, TABLE};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub count: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinRateStats {
    pub won: i64,
    pub lost: i64,
    pub win_rate_pct: f64,
    pub won_value: f64,
    pub lost_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPipeline {
    pub count: i64,
    /// Sum of recorded close_value on open rows. Mostly zero for organic
    /// data (value is only set at close); synthetic admin rows carry one.
    pub recorded_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStats {
    pub avg_days: f64,
    pub min_days: i64,
    pub max_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepRevenue {
    pub agent: String,
    pub deals: i64,
    pub value: f64,
    pub avg_deal: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRevenue {
    pub product: String,
    pub deals: i64,
    pub value: f64,
    pub avg_deal: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodPoint {
    pub period: String,
    pub value: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepLoad {
    pub agent: String,
    pub open_deals: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepRamp {
    pub agent: String,
    pub first_engage: NaiveDate,
    /// Days from first engagement to first win; None if no win yet.
    pub days_to_first_win: Option<i64>,
    /// Tenure against the injected `now`, i.e. wall clock in production.
    pub tenure_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountStats {
    pub recent_closed: i64,
    pub discounted: i64,
    pub share: f64,
    pub historical_avg_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub open_count: i64,
    /// Recorded value on the open rows, the base the forecast prices.
    pub open_value: f64,
    pub win_rate: f64,
    pub forecast_deals: i64,
    pub forecast_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostProxy {
    pub closed_attempts: i64,
    pub estimated_cost: f64,
    pub won_revenue: f64,
    /// Won revenue per cost unit; 0 when nothing was spent.
    pub return_per_cost_unit: f64,
}

/// Divide with the crate-wide zero-denominator convention.
pub fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Calculator set over one store.
#[derive(Debug, Clone)]
pub struct Metrics {
    store: Store,
}

impl Metrics {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn dialect(&self) -> SqlDialect {
        self.store.dialect()
    }

    fn one_f64(&self, sql: &str) -> f64 {
        self.store
            .query(sql)
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.into_iter().next())
            .map(|s| s.as_f64())
            .unwrap_or(0.0)
    }

    fn one_i64(&self, sql: &str) -> i64 {
        self.store
            .query(sql)
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.into_iter().next())
            .map(|s| s.as_i64())
            .unwrap_or(0)
    }

    /// Maximum close date in the dataset, the stand-in for "now".
    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.store
            .query(&format!("SELECT MAX(close_date) FROM {TABLE}"))
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.into_iter().next())
            .and_then(|s| s.as_date())
    }

    /// Count and value per stage, for the KPI tiles.
    pub fn stage_summary(&self) -> Vec<StageSummary> {
        let rows = self.store.query(&format!(
            "SELECT deal_stage, COUNT(*), COALESCE(SUM(close_value), 0)
             FROM {TABLE} GROUP BY deal_stage"
        ));
        rows.unwrap_or_default()
            .into_iter()
            .map(|r| StageSummary {
                stage: r[0].as_str().to_string(),
                count: r[1].as_i64(),
                value: r[2].as_f64(),
            })
            .collect()
    }

    pub fn win_rate(&self) -> WinRateStats {
        let rows = self
            .store
            .query(&format!(
                "SELECT deal_stage, COUNT(*), COALESCE(SUM(close_value), 0)
                 FROM {TABLE}
                 WHERE deal_stage IN ('Won', 'Lost')
                 GROUP BY deal_stage"
            ))
            .unwrap_or_default();

        let mut stats = WinRateStats {
            won: 0,
            lost: 0,
            win_rate_pct: 0.0,
            won_value: 0.0,
            lost_value: 0.0,
        };
        for row in rows {
            match row[0].as_str() {
                "Won" => {
                    stats.won = row[1].as_i64();
                    stats.won_value = row[2].as_f64();
                }
                "Lost" => {
                    stats.lost = row[1].as_i64();
                    stats.lost_value = row[2].as_f64();
                }
                _ => {}
            }
        }
        stats.win_rate_pct = ratio(stats.won as f64, (stats.won + stats.lost) as f64) * 100.0;
        stats
    }

    pub fn open_pipeline(&self) -> OpenPipeline {
        let row = self
            .store
            .query(&format!(
                "SELECT COUNT(*), COALESCE(SUM(close_value), 0)
                 FROM {TABLE} WHERE deal_stage = 'Engaging'"
            ))
            .and_then(|rows| rows.into_iter().next());
        match row {
            Some(r) => OpenPipeline {
                count: r[0].as_i64(),
                recorded_value: r[1].as_f64(),
            },
            None => OpenPipeline {
                count: 0,
                recorded_value: 0.0,
            },
        }
    }

    /// Average value of won deals, excluding zero-valued rows.
    pub fn avg_won_deal_value(&self) -> f64 {
        self.one_f64(&format!(
            "SELECT COALESCE(AVG(close_value), 0)
             FROM {TABLE} WHERE deal_stage = 'Won' AND close_value > 0"
        ))
    }

    /// Estimated open-pipeline value: open-deal count times the average
    /// **won**-deal value. Open deals carry no value of their own until
    /// close, so this is a deliberately biased proxy: it assumes every
    /// open deal looks like an average won one.
    pub fn estimated_pipeline_value(&self) -> f64 {
        self.open_pipeline().count as f64 * self.avg_won_deal_value()
    }

    /// Historical monthly revenue run-rate: total won value divided by the
    /// number of distinct close months in the data.
    pub fn monthly_revenue(&self) -> f64 {
        let month = self.dialect().month_of("close_date");
        let total = self.one_f64(&format!(
            "SELECT COALESCE(SUM(close_value), 0) FROM {TABLE} WHERE deal_stage = 'Won'"
        ));
        let months = self.one_i64(&format!(
            "SELECT COUNT(DISTINCT {month}) FROM {TABLE}
             WHERE deal_stage = 'Won' AND close_date IS NOT NULL"
        ));
        ratio(total, months as f64)
    }

    /// Pipeline coverage multiple: estimated pipeline value over monthly
    /// revenue. Zero when there is no revenue history or no open deals.
    pub fn pipeline_coverage(&self) -> f64 {
        ratio(self.estimated_pipeline_value(), self.monthly_revenue())
    }

    /// Close-cycle statistics over won deals with both dates present.
    pub fn sales_cycle(&self) -> Option<CycleStats> {
        let diff = self.dialect().datediff("close_date", "engage_date");
        let row = self
            .store
            .query(&format!(
                "SELECT AVG({diff}), MIN({diff}), MAX({diff})
                 FROM {TABLE}
                 WHERE deal_stage = 'Won'
                   AND close_date IS NOT NULL AND engage_date IS NOT NULL"
            ))?
            .into_iter()
            .next()?;
        if row[0].is_null() {
            return None;
        }
        Some(CycleStats {
            avg_days: row[0].as_f64(),
            min_days: row[1].as_i64(),
            max_days: row[2].as_i64(),
        })
    }

    /// Win rate per quarter, ascending. `value` is the win-rate percentage,
    /// `count` the number of closed deals in the quarter.
    pub fn quarterly_win_rates(&self) -> Vec<PeriodPoint> {
        let quarter = self.dialect().quarter_of("close_date");
        self.store
            .query(&format!(
                "SELECT {quarter} AS q,
                        100.0 * SUM(CASE WHEN deal_stage = 'Won' THEN 1 ELSE 0 END) / COUNT(*),
                        COUNT(*)
                 FROM {TABLE}
                 WHERE deal_stage IN ('Won', 'Lost') AND close_date IS NOT NULL
                 GROUP BY q ORDER BY q"
            ))
            .unwrap_or_default()
            .into_iter()
            .map(|r| PeriodPoint {
                period: r[0].as_str().to_string(),
                value: r[1].as_f64(),
                count: r[2].as_i64(),
            })
            .collect()
    }

    /// Won revenue per quarter, ascending. `count` is won deals.
    pub fn quarterly_revenue(&self) -> Vec<PeriodPoint> {
        let quarter = self.dialect().quarter_of("close_date");
        self.store
            .query(&format!(
                "SELECT {quarter} AS q, COALESCE(SUM(close_value), 0), COUNT(*)
                 FROM {TABLE}
                 WHERE deal_stage = 'Won' AND close_date IS NOT NULL
                 GROUP BY q ORDER BY q"
            ))
            .unwrap_or_default()
            .into_iter()
            .map(|r| PeriodPoint {
                period: r[0].as_str().to_string(),
                value: r[1].as_f64(),
                count: r[2].as_i64(),
            })
            .collect()
    }

    /// Average close cycle per close month, ascending.
    pub fn monthly_cycle(&self) -> Vec<PeriodPoint> {
        let month = self.dialect().month_of("close_date");
        let diff = self.dialect().datediff("close_date", "engage_date");
        self.store
            .query(&format!(
                "SELECT {month} AS m, AVG({diff}), COUNT(*)
                 FROM {TABLE}
                 WHERE deal_stage = 'Won'
                   AND close_date IS NOT NULL AND engage_date IS NOT NULL
                 GROUP BY m ORDER BY m"
            ))
            .unwrap_or_default()
            .into_iter()
            .map(|r| PeriodPoint {
                period: r[0].as_str().to_string(),
                value: r[1].as_f64(),
                count: r[2].as_i64(),
            })
            .collect()
    }

    /// Won revenue per rep, highest first.
    pub fn revenue_by_rep(&self) -> Vec<RepRevenue> {
        self.store
            .query(&format!(
                "SELECT sales_agent, COUNT(*), COALESCE(SUM(close_value), 0)
                 FROM {TABLE}
                 WHERE deal_stage = 'Won'
                 GROUP BY sales_agent
                 ORDER BY SUM(close_value) DESC"
            ))
            .unwrap_or_default()
            .into_iter()
            .map(|r| {
                let deals = r[1].as_i64();
                let value = r[2].as_f64();
                RepRevenue {
                    agent: r[0].as_str().to_string(),
                    deals,
                    value,
                    avg_deal: ratio(value, deals as f64),
                }
            })
            .collect()
    }

    pub fn top_reps(&self, n: usize) -> Vec<RepRevenue> {
        let mut reps = self.revenue_by_rep();
        reps.truncate(n);
        reps
    }

    /// Won revenue per product, highest first.
    pub fn product_revenue(&self) -> Vec<ProductRevenue> {
        self.store
            .query(&format!(
                "SELECT product, COUNT(*), COALESCE(SUM(close_value), 0)
                 FROM {TABLE}
                 WHERE deal_stage = 'Won'
                 GROUP BY product
                 ORDER BY SUM(close_value) DESC"
            ))
            .unwrap_or_default()
            .into_iter()
            .map(|r| {
                let deals = r[1].as_i64();
                let value = r[2].as_f64();
                ProductRevenue {
                    product: r[0].as_str().to_string(),
                    deals,
                    value,
                    avg_deal: ratio(value, deals as f64),
                }
            })
            .collect()
    }

    /// Ages of open deals in days, relative to the reference date.
    pub fn open_deal_ages(&self) -> Vec<i64> {
        let Some(reference) = self.reference_date() else {
            return Vec::new();
        };
        let age = self
            .dialect()
            .datediff(&format!("'{reference}'"), "engage_date");
        self.store
            .query(&format!(
                "SELECT {age} FROM {TABLE}
                 WHERE deal_stage = 'Engaging' AND engage_date IS NOT NULL"
            ))
            .unwrap_or_default()
            .into_iter()
            .map(|r| r[0].as_i64())
            .collect()
    }

    /// Open-deal count per rep, highest load first.
    pub fn rep_open_loads(&self) -> Vec<RepLoad> {
        self.store
            .query(&format!(
                "SELECT sales_agent, COUNT(*) FROM {TABLE}
                 WHERE deal_stage = 'Engaging'
                 GROUP BY sales_agent
                 ORDER BY COUNT(*) DESC"
            ))
            .unwrap_or_default()
            .into_iter()
            .map(|r| RepLoad {
                agent: r[0].as_str().to_string(),
                open_deals: r[1].as_i64(),
            })
            .collect()
    }

    /// Per-rep ramp data: first engagement, days to first win, and tenure.
    ///
    /// Tenure is measured against the caller-supplied `now`. Production
    /// callers pass the wall clock, so tenure does NOT follow the
    /// reference-date convention the other calculators use. Kept that way
    /// rather than standardized silently.
    pub fn rep_ramp(&self, now: NaiveDate) -> Vec<RepRamp> {
        let rows = self
            .store
            .query(&format!(
                "SELECT sales_agent,
                        MIN(engage_date),
                        MIN(CASE WHEN deal_stage = 'Won' THEN close_date END)
                 FROM {TABLE}
                 WHERE engage_date IS NOT NULL
                 GROUP BY sales_agent"
            ))
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|r| {
                let first_engage = r[1].as_date()?;
                let first_win = r[2].as_date();
                Some(RepRamp {
                    agent: r[0].as_str().to_string(),
                    first_engage,
                    days_to_first_win: first_win
                        .map(|w| (w - first_engage).num_days())
                        .filter(|d| *d >= 0),
                    tenure_days: (now - first_engage).num_days(),
                })
            })
            .collect()
    }

    /// Share of recently closed won deals priced more than `depth_frac`
    /// below the historical average won value. "Recent" is the trailing
    /// `window_days` before the reference date.
    pub fn recent_discount_share(&self, window_days: i64, depth_frac: f64) -> Option<DiscountStats> {
        let reference = self.reference_date()?;
        let historical_avg = self.avg_won_deal_value();
        if historical_avg == 0.0 {
            return None;
        }
        let floor = historical_avg * (1.0 - depth_frac);
        let window_start = self
            .dialect()
            .days_before(&format!("'{reference}'"), window_days);

        let row = self
            .store
            .query(&format!(
                "SELECT COUNT(*),
                        SUM(CASE WHEN close_value < {floor} THEN 1 ELSE 0 END)
                 FROM {TABLE}
                 WHERE deal_stage = 'Won'
                   AND close_value > 0
                   AND close_date >= {window_start}"
            ))?
            .into_iter()
            .next()?;

        let recent_closed = row[0].as_i64();
        let discounted = row[1].as_i64();
        Some(DiscountStats {
            recent_closed,
            discounted,
            share: ratio(discounted as f64, recent_closed as f64),
            historical_avg_value: historical_avg,
        })
    }

    /// Naive conversion forecast: historical win rate applied to the open
    /// pipeline's recorded value. The optimistic estimate from
    /// [`Metrics::estimated_pipeline_value`] belongs to the coverage
    /// metric, not here.
    pub fn forecast(&self) -> Forecast {
        let open = self.open_pipeline();
        let win_rate = self.win_rate().win_rate_pct / 100.0;
        Forecast {
            open_count: open.count,
            open_value: open.recorded_value,
            win_rate,
            forecast_deals: (open.count as f64 * win_rate) as i64,
            forecast_value: open.recorded_value * win_rate,
        }
    }

    /// Cost-of-sales proxy: every closed deal (won or lost) counts as one
    /// paid attempt at `cost_per_attempt`.
    pub fn cost_of_sales(&self, cost_per_attempt: f64) -> CostProxy {
        let closed_attempts = self.one_i64(&format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE deal_stage IN ('Won', 'Lost')"
        ));
        let won_revenue = self.one_f64(&format!(
            "SELECT COALESCE(SUM(close_value), 0) FROM {TABLE} WHERE deal_stage = 'Won'"
        ));
        let estimated_cost = closed_attempts as f64 * cost_per_attempt;
        CostProxy {
            closed_attempts,
            estimated_cost,
            won_revenue,
            return_per_cost_unit: ratio(won_revenue, estimated_cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_yields_zero_on_zero_denominator() {
        assert_eq!(ratio(10.0, 0.0), 0.0);
        assert_eq!(ratio(0.0, 0.0), 0.0);
        assert_eq!(ratio(9.0, 3.0), 3.0);
    }
}
