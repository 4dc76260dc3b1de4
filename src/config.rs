//! Startup configuration
//!
//! Everything is read once from the environment (a `.env` file is honored)
//! and never hot-reloaded. Demo threshold constants that drive alert and
//! investigation logic live in [`Thresholds`] so they can be overridden
//! without a rebuild.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Alert and investigation threshold constants.
///
/// Defaults match the long-standing demo literals. None of them have a
/// cited business justification, so they are configuration, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Win-rate decline trigger, in percentage points quarter over quarter.
    pub win_rate_decline_pts: f64,
    /// Pipeline coverage warning floor (multiple of monthly revenue).
    pub coverage_warn_multiple: f64,
    /// Pipeline coverage critical floor.
    pub coverage_critical_multiple: f64,
    /// Month-over-month cycle lengthening trigger (fraction, 0.15 = 15%).
    pub cycle_lengthening_frac: f64,
    /// Minimum share of reps above mean revenue before concentration fires.
    pub rep_concentration_share: f64,
    /// Top product vs second product revenue multiple.
    pub product_imbalance_multiple: f64,
    /// Share of open deals older than `stuck_days` that counts as churn risk.
    pub stuck_share: f64,
    /// Days an open deal can age before it is "stuck".
    pub stuck_days: i64,
    /// Top rep vs bottom rep open-deal-count multiple.
    pub territory_multiple: f64,
    /// Minimum reps with open deals before territory imbalance is evaluated.
    pub territory_min_reps: i64,
    /// Days of tenure under which a rep counts as new.
    pub new_rep_days: i64,
    /// Ramp trigger: multiple of the average time-to-first-win.
    pub ramp_multiple: f64,
    /// Discount depth: fraction below the historical average deal value.
    pub discount_depth_frac: f64,
    /// Discount frequency trigger over the trailing window.
    pub discount_share: f64,
    /// Trailing window for discount frequency, in days.
    pub discount_window_days: i64,
    /// Seasonal drop trigger: recent quarter below this fraction of prior.
    pub seasonal_drop_frac: f64,
    /// Churn investigation: stuck-deal value vs overall average multiple.
    pub churn_value_multiple: f64,
    /// Seasonal investigation: deal-count drop fraction for the volume call.
    pub seasonal_volume_drop_frac: f64,
    /// Concentration investigation: bottom-half deal size this far under
    /// the top half's marks a size gap.
    pub rep_deal_size_gap_frac: f64,
    /// Imbalance investigation: runner-up win rate this far under the
    /// leader's marks a conversion gap.
    pub product_conversion_gap_frac: f64,
    /// Discount investigation: one rep holding more than this share of the
    /// discounted deals makes it a single-rep problem.
    pub discount_single_rep_share: f64,
    /// Coverage investigation: open-deal age vs won-cycle multiple.
    pub coverage_age_multiple: f64,
    /// Cost proxy per sales attempt, currency units.
    pub cost_per_attempt: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            win_rate_decline_pts: 3.0,
            coverage_warn_multiple: 4.0,
            coverage_critical_multiple: 2.5,
            cycle_lengthening_frac: 0.15,
            rep_concentration_share: 0.40,
            product_imbalance_multiple: 3.0,
            stuck_share: 0.50,
            stuck_days: 90,
            territory_multiple: 3.0,
            territory_min_reps: 5,
            new_rep_days: 180,
            ramp_multiple: 1.5,
            discount_depth_frac: 0.20,
            discount_share: 0.30,
            discount_window_days: 90,
            seasonal_drop_frac: 0.75,
            churn_value_multiple: 1.3,
            seasonal_volume_drop_frac: 0.25,
            rep_deal_size_gap_frac: 0.25,
            product_conversion_gap_frac: 0.25,
            discount_single_rep_share: 0.50,
            coverage_age_multiple: 1.15,
            cost_per_attempt: 500.0,
        }
    }
}

/// Per-session cap on metered live-responder calls.
pub const LIVE_USE_CAP: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the embedded store file.
    pub db_path: PathBuf,
    /// Source CSV for bulk load / reset.
    pub source_csv: PathBuf,
    /// Text-generation service credential.
    pub api_key: Option<String>,
    /// Secret gating admin actions and the live responder path.
    pub admin_secret: Option<String>,
    pub thresholds: Thresholds,
}

impl Config {
    /// Load configuration from the environment. Missing keys fall back to
    /// demo defaults; a missing API key or admin secret is allowed and only
    /// surfaces when the gated path is exercised.
    pub fn from_env() -> Self {
        let thresholds = Thresholds {
            stuck_days: env_i64("REVOPS_STUCK_DAYS", 90),
            cost_per_attempt: env_f64("REVOPS_COST_PER_ATTEMPT", 500.0),
            ..Thresholds::default()
        };

        Self {
            db_path: PathBuf::from(
                std::env::var("REVOPS_DB").unwrap_or_else(|_| "revenue_ops.db".to_string()),
            ),
            source_csv: PathBuf::from(
                std::env::var("REVOPS_SOURCE_CSV")
                    .unwrap_or_else(|_| "sales_pipeline.csv".to_string()),
            ),
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            admin_secret: std::env::var("ADMIN_SECRET").ok(),
            thresholds,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_investigation_cutoff_has_its_own_field() {
        let t = Thresholds::default();
        assert_eq!(t.rep_deal_size_gap_frac, 0.25);
        assert_eq!(t.product_conversion_gap_frac, 0.25);
        assert_eq!(t.discount_single_rep_share, 0.50);

        // Overriding one does not move the numerically equal neighbors.
        let t = Thresholds {
            seasonal_volume_drop_frac: 0.9,
            stuck_share: 0.1,
            ..Thresholds::default()
        };
        assert_eq!(t.rep_deal_size_gap_frac, 0.25);
        assert_eq!(t.product_conversion_gap_frac, 0.25);
        assert_eq!(t.discount_single_rep_share, 0.50);
    }
}
