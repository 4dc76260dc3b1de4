//! Responders
//!
//! Two ways to answer a free-text prompt:
//!
//! 1. The demo responder routes the prompt through [`ROUTES`], an explicit
//!    ordered table of (keywords, handler) pairs. Matching is
//!    case-insensitive substring search and the FIRST matching entry wins,
//!    even when a later entry would fit better. The precedence is the
//!    table order, which is a documented behavior with a unit test per
//!    entry, not an accident of branch layout.
//! 2. The live responder forwards the prompt plus the schema description
//!    to the text-generation service. If the reply carries a tagged query,
//!    it is executed and a second request asks for narrative insights over
//!    the rows (at most 50 surfaced). Every failure becomes a visible
//!    "❌ Error: …" answer; the session keeps running.

use crate::llm::{extract_sql, GenClient, ANALYST_SYSTEM_PROMPT, SCHEMA_PROMPT};
use crate::metrics::Metrics;
use crate::session::Session;
use crate::store::{Row, Scalar};
use tracing::{info, warn};

/// Maximum executed-result rows surfaced to the generator.
pub const LIVE_ROW_CAP: usize = 50;

pub struct Route {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub handler: fn(&Metrics) -> Option<String>,
}

/// The router's priority list, first match wins. Order is part of the
/// contract: a prompt mentioning both "win rate" and "pipeline" resolves
/// to the pipeline entry because it comes first.
pub const ROUTES: &[Route] = &[
    Route {
        name: "pipeline",
        keywords: &["pipeline", "open"],
        handler: pipeline_answer,
    },
    Route {
        name: "win_rate",
        keywords: &["win rate", "won"],
        handler: win_rate_answer,
    },
    Route {
        name: "reps",
        keywords: &["rep", "agent", "performance"],
        handler: reps_answer,
    },
    Route {
        name: "products",
        keywords: &["product"],
        handler: products_answer,
    },
    Route {
        name: "cycle",
        keywords: &["velocity", "cycle", "time"],
        handler: cycle_answer,
    },
    Route {
        name: "forecast",
        keywords: &["forecast", "predict"],
        handler: forecast_answer,
    },
    Route {
        name: "average",
        keywords: &["average", "avg"],
        handler: average_answer,
    },
];

pub const HELP_TEXT: &str = "**Try asking about:**\n\
• Pipeline value and open deals\n\
• Win rates and conversion\n\
• Top sales reps\n\
• Product performance\n\
• Sales cycle velocity\n\
• Revenue forecasting";

/// First route whose keyword list matches the lower-cased prompt.
pub fn route_for(prompt: &str) -> Option<&'static Route> {
    let lower = prompt.to_lowercase();
    ROUTES
        .iter()
        .find(|route| route.keywords.iter().any(|k| lower.contains(k)))
}

/// Demo responder: route, run the matched calculator, format. No match
/// gets the fixed help message; a matched route with no data degrades to
/// a short notice instead of failing.
pub fn demo_response(metrics: &Metrics, prompt: &str) -> String {
    match route_for(prompt) {
        Some(route) => {
            info!("demo responder matched route '{}'", route.name);
            (route.handler)(metrics).unwrap_or_else(|| "No data available yet.".to_string())
        }
        None => HELP_TEXT.to_string(),
    }
}

fn pipeline_answer(metrics: &Metrics) -> Option<String> {
    let open = metrics.open_pipeline();
    if open.count == 0 && open.recorded_value == 0.0 {
        return None;
    }
    let avg = if open.count > 0 {
        open.recorded_value / open.count as f64
    } else {
        0.0
    };
    Some(format!(
        "**Open Pipeline Analysis:**\n\n\
         • Active deals: {}\n\
         • Total pipeline value: ${}\n\
         • Average deal size: ${}\n\n\
         This represents all currently open opportunities.",
        group_thousands(open.count),
        money(open.recorded_value),
        money(avg)
    ))
}

fn win_rate_answer(metrics: &Metrics) -> Option<String> {
    let stats = metrics.win_rate();
    if stats.won + stats.lost == 0 {
        return None;
    }
    Some(format!(
        "**Win Rate Analysis:**\n\n\
         • Deals won: {}\n\
         • Deals lost: {}\n\
         • **Win rate: {:.1}%**\n\
         • Total won value: ${}\n\
         • Total lost potential: ${}",
        group_thousands(stats.won),
        group_thousands(stats.lost),
        stats.win_rate_pct,
        money(stats.won_value),
        money(stats.lost_value)
    ))
}

fn reps_answer(metrics: &Metrics) -> Option<String> {
    let reps = metrics.top_reps(5);
    if reps.is_empty() {
        return None;
    }
    let mut out = String::from("**Top 5 Sales Reps by Revenue:**\n\n");
    for (i, rep) in reps.iter().enumerate() {
        out.push_str(&format!(
            "{}. **{}**: {} won | ${} total | ${} avg\n",
            i + 1,
            rep.agent,
            rep.deals,
            money(rep.value),
            money(rep.avg_deal)
        ));
    }
    Some(out)
}

fn products_answer(metrics: &Metrics) -> Option<String> {
    let products = metrics.product_revenue();
    if products.is_empty() {
        return None;
    }
    let mut out = String::from("**Product Performance (Won Deals):**\n\n");
    for p in &products {
        out.push_str(&format!(
            "• **{}**: {} deals | ${} total | ${} avg\n",
            p.product,
            p.deals,
            money(p.value),
            money(p.avg_deal)
        ));
    }
    Some(out)
}

fn cycle_answer(metrics: &Metrics) -> Option<String> {
    let cycle = metrics.sales_cycle()?;
    Some(format!(
        "**Sales Cycle Analysis:**\n\n\
         • Average time to close: {:.0} days\n\
         • Fastest deal: {} days\n\
         • Longest deal: {} days",
        cycle.avg_days, cycle.min_days, cycle.max_days
    ))
}

fn forecast_answer(metrics: &Metrics) -> Option<String> {
    let forecast = metrics.forecast();
    if forecast.open_count == 0 {
        return None;
    }
    Some(format!(
        "**Pipeline Forecast:**\n\n\
         • Open pipeline: {} deals worth ${}\n\
         • Historical win rate: {:.1}%\n\
         • **Forecasted wins: {} deals**\n\
         • **Forecasted revenue: ${}**",
        group_thousands(forecast.open_count),
        money(forecast.open_value),
        forecast.win_rate * 100.0,
        group_thousands(forecast.forecast_deals),
        money(forecast.forecast_value)
    ))
}

fn average_answer(metrics: &Metrics) -> Option<String> {
    let avg = metrics.avg_won_deal_value();
    if avg == 0.0 {
        return None;
    }
    Some(format!(
        "**Average Deal Size:** ${}\n\nCalculated from all won deals.",
        money(avg)
    ))
}

/// Live responder: two-stage delegated generation. Consumes one metered
/// use up front; a missing credential or any downstream failure comes
/// back as an error answer.
pub async fn live_response(
    metrics: &Metrics,
    api_key: Option<&str>,
    session: &mut Session,
    prompt: &str,
) -> String {
    let Some(api_key) = api_key else {
        return "❌ Error: API key not found.".to_string();
    };
    if !session.take_live_use() {
        return "❌ Error: live responder limit reached for this session.".to_string();
    }

    let client = GenClient::new(api_key.to_string());
    let stage_one = format!("{SCHEMA_PROMPT}\n\nUSER QUESTION: {prompt}");
    let reply = match client.generate(ANALYST_SYSTEM_PROMPT, &stage_one).await {
        Ok(reply) => reply,
        Err(e) => return format!("❌ Error: {e}"),
    };

    let Some(sql) = extract_sql(&reply) else {
        // Direct answer, no query to run.
        return reply;
    };
    info!("live responder executing generated query: {}", sql);

    let rows = match metrics.store().query(&sql) {
        Some(rows) if !rows.is_empty() => rows,
        Some(_) => return "❌ Error: the generated query returned no rows.".to_string(),
        None => {
            warn!("generated query failed to execute");
            return "❌ Error: the generated query could not be executed.".to_string();
        }
    };

    let surfaced = rows_as_json(&rows, LIVE_ROW_CAP);
    let stage_two = format!(
        "USER QUESTION: {prompt}\n\nQUERY RESULTS (first {} of {} rows):\n{}\n\n\
         Provide narrative insights over these results only. No SQL.",
        surfaced.as_array().map(|a| a.len()).unwrap_or(0),
        rows.len(),
        surfaced
    );
    match client.generate(ANALYST_SYSTEM_PROMPT, &stage_two).await {
        Ok(insights) => insights,
        Err(e) => format!("❌ Error: {e}"),
    }
}

/// Turn the session's stored investigation into recommended actions via
/// the generation service. Metered like any other live call.
pub async fn recommend(api_key: Option<&str>, session: &mut Session) -> String {
    let Some(investigation) = session.last_investigation.clone() else {
        return "❌ Error: no investigation to act on yet.".to_string();
    };
    let Some(api_key) = api_key else {
        return "❌ Error: API key not found.".to_string();
    };
    if !session.take_live_use() {
        return "❌ Error: live responder limit reached for this session.".to_string();
    }
    let client = GenClient::new(api_key.to_string());
    match client
        .generate(ANALYST_SYSTEM_PROMPT, &investigation.prompt_seed)
        .await
    {
        Ok(actions) => actions,
        Err(e) => format!("❌ Error: {e}"),
    }
}

fn rows_as_json(rows: &[Row], cap: usize) -> serde_json::Value {
    let mapped: Vec<serde_json::Value> = rows
        .iter()
        .take(cap)
        .map(|row| {
            serde_json::Value::Array(
                row.iter()
                    .map(|s| match s {
                        Scalar::Null => serde_json::Value::Null,
                        Scalar::Int(v) => serde_json::Value::from(*v),
                        Scalar::Real(v) => serde_json::Number::from_f64(*v)
                            .map(serde_json::Value::Number)
                            .unwrap_or(serde_json::Value::Null),
                        Scalar::Text(t) => serde_json::Value::from(t.as_str()),
                    })
                    .collect(),
            )
        })
        .collect();
    serde_json::Value::Array(mapped)
}

/// Group an integer count with thousands separators.
fn group_thousands(value: i64) -> String {
    let digits = value.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Currency formatting: rounded to whole units, thousands-grouped.
fn money(value: f64) -> String {
    group_thousands(value.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(950), "950");
        assert_eq!(group_thousands(8800), "8,800");
        assert_eq!(group_thousands(1234567), "1,234,567");
        assert_eq!(group_thousands(-50000), "-50,000");
    }

    #[test]
    fn money_rounds_to_whole_units() {
        assert_eq!(money(49999.6), "50,000");
        assert_eq!(money(0.4), "0");
    }

    #[test]
    fn routes_match_on_any_keyword_case_insensitively() {
        assert_eq!(route_for("What's our OPEN pipeline?").unwrap().name, "pipeline");
        assert_eq!(route_for("show me the win rate").unwrap().name, "win_rate");
        assert_eq!(route_for("top AGENTS please").unwrap().name, "reps");
        assert_eq!(route_for("product performance").unwrap().name, "reps");
        assert_eq!(route_for("how is GTXPro doing as a product?").unwrap().name, "products");
        assert_eq!(route_for("deal velocity?").unwrap().name, "cycle");
        assert_eq!(route_for("forecast next quarter").unwrap().name, "forecast");
        assert_eq!(route_for("what's the avg deal size").unwrap().name, "average");
        assert!(route_for("tell me a joke").is_none());
    }

    #[test]
    fn first_match_wins_over_later_entries() {
        // Both "win rate" (entry 2) and "pipeline" (entry 1) appear; the
        // table order makes pipeline the answer, by contract.
        assert_eq!(
            route_for("how does win rate affect the pipeline?").unwrap().name,
            "pipeline"
        );
        // "time" (cycle) vs "forecast": cycle is ordered first.
        assert_eq!(
            route_for("time to forecast revenue").unwrap().name,
            "cycle"
        );
    }
}
