use revops_engine::alerts::{AlertDetector, AlertKind, Severity};
use revops_engine::config::Thresholds;
use revops_engine::ingest;
use revops_engine::metrics::Metrics;
use revops_engine::store::Store;
use chrono::NaiveDate;
use rusqlite::params;

fn fresh_store(tag: &str) -> Store {
    let path = std::env::temp_dir().join(format!("revops_alerts_{}_{}.db", tag, std::process::id()));
    let _ = std::fs::remove_file(&path);
    let store = Store::open(&path);
    ingest::ensure_schema(&store).expect("schema should apply");
    store
}

fn seed(
    store: &Store,
    id: &str,
    agent: &str,
    product: &str,
    stage: &str,
    engage: Option<&str>,
    close: Option<&str>,
    value: i64,
) {
    store
        .execute(
            "INSERT INTO sales_pipeline
             (opportunity_id, sales_agent, product, account, deal_stage, engage_date, close_date, close_value)
             VALUES (?1, ?2, ?3, 'Acme Corp', ?4, ?5, ?6, ?7)",
            params![id, agent, product, stage, engage, close, value],
        )
        .expect("insert should succeed");
}

fn detector(store: Store) -> AlertDetector {
    AlertDetector::new(Metrics::new(store), Thresholds::default())
}

fn a_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 7, 1).unwrap()
}

#[test]
fn no_data_means_no_alerts() {
    let alerts = detector(fresh_store("silence")).detect(a_day());
    assert!(
        alerts.is_empty(),
        "rules must stay silent without data, got {alerts:?}"
    );
}

#[test]
fn detection_is_a_pure_function_of_the_dataset() {
    let store = fresh_store("purity");
    seed(&store, "W1", "RepA", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-02-01"), 10_000);
    seed(&store, "L1", "RepA", "GTX Basic", "Lost", Some("2017-01-05"), Some("2017-02-05"), 0);

    let detector = detector(store);
    let first = detector.detect(a_day());
    let second = detector.detect(a_day());
    assert_eq!(first, second, "same data, same alerts");
}

#[test]
fn empty_open_pipeline_with_revenue_history_is_a_critical_coverage_alert() {
    let store = fresh_store("coverage");
    // Healthy revenue history, not a single open deal. Coverage is 0x and
    // that is the worst case, not a skipped case. Same value on every win
    // keeps the discount rule quiet.
    for i in 0..4 {
        seed(
            &store,
            &format!("W{i}"),
            "RepA",
            "GTX Basic",
            "Won",
            Some("2017-01-01"),
            Some("2017-02-15"),
            10_000,
        );
    }

    let alerts = detector(store).detect(a_day());
    assert_eq!(alerts.len(), 1, "only coverage should fire: {alerts:?}");
    assert_eq!(alerts[0].kind, AlertKind::PipelineCoverage);
    assert_eq!(alerts[0].severity, Severity::Critical);
    println!("zero open deals -> coverage 0.0x -> critical");
}

#[test]
fn quarter_over_quarter_win_rate_drop_fires() {
    let store = fresh_store("winrate");
    // Q1 2017: 4 of 5 won (80%). Q2 2017: 1 of 5 won (20%).
    for i in 0..4 {
        seed(&store, &format!("Q1W{i}"), "RepA", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-02-01"), 10_000);
    }
    seed(&store, "Q1L0", "RepA", "GTX Basic", "Lost", Some("2017-01-01"), Some("2017-02-10"), 0);
    seed(&store, "Q2W0", "RepA", "GTX Basic", "Won", Some("2017-04-01"), Some("2017-05-01"), 10_000);
    for i in 0..4 {
        seed(&store, &format!("Q2L{i}"), "RepA", "GTX Basic", "Lost", Some("2017-04-01"), Some("2017-05-10"), 0);
    }

    let alerts = detector(store).detect(a_day());
    let win = alerts
        .iter()
        .find(|a| a.kind == AlertKind::WinRateDecline)
        .expect("60-point drop must fire");
    assert_eq!(win.severity, Severity::Critical);
    assert!(win.message.contains("80.0%"), "message was: {}", win.message);
    assert!(win.message.contains("20.0%"), "message was: {}", win.message);
}

#[test]
fn mostly_stale_open_deals_fire_the_stuck_rule() {
    let store = fresh_store("stuck");
    // Reference date comes from the latest close: 2017-12-31.
    seed(&store, "W1", "RepA", "GTX Basic", "Won", Some("2017-10-01"), Some("2017-12-31"), 10_000);
    // Three deals open since January (364 days), one fresh one.
    for i in 0..3 {
        seed(&store, &format!("O{i}"), "RepA", "GTX Basic", "Engaging", Some("2017-01-01"), None, 0);
    }
    seed(&store, "O3", "RepA", "GTX Basic", "Engaging", Some("2017-12-01"), None, 0);

    let alerts = detector(store).detect(a_day());
    let stuck = alerts
        .iter()
        .find(|a| a.kind == AlertKind::StuckPipeline)
        .expect("3 of 4 stale must fire");
    assert!(stuck.message.contains("3 of 4"), "message was: {}", stuck.message);
}

#[test]
fn lopsided_open_deal_loads_fire_territory_imbalance() {
    let store = fresh_store("territory");
    // Five reps carrying 9/2/2/2/1 open deals. No revenue at all, so the
    // coverage rule has nothing to measure against and stays quiet.
    let loads = [("RepA", 9), ("RepB", 2), ("RepC", 2), ("RepD", 2), ("RepE", 1)];
    let mut n = 0;
    for (agent, count) in loads {
        for _ in 0..count {
            seed(&store, &format!("O{n}"), agent, "GTX Basic", "Engaging", Some("2017-06-01"), None, 0);
            n += 1;
        }
    }

    let alerts = detector(store).detect(a_day());
    let territory = alerts
        .iter()
        .find(|a| a.kind == AlertKind::TerritoryImbalance)
        .expect("9 vs 1 open deals must fire");
    assert!(territory.message.contains("RepA"), "message was: {}", territory.message);
    assert!(territory.message.contains("RepE"), "message was: {}", territory.message);
}

#[test]
fn four_reps_with_open_deals_is_below_the_territory_floor() {
    let store = fresh_store("territory_floor");
    // Same imbalance, one rep short of the minimum roster. Silence.
    let loads = [("RepA", 9), ("RepB", 2), ("RepC", 2), ("RepD", 1)];
    let mut n = 0;
    for (agent, count) in loads {
        for _ in 0..count {
            seed(&store, &format!("O{n}"), agent, "GTX Basic", "Engaging", Some("2017-06-01"), None, 0);
            n += 1;
        }
    }

    let alerts = detector(store).detect(a_day());
    assert!(
        alerts.iter().all(|a| a.kind != AlertKind::TerritoryImbalance),
        "four reps must not trip the five-rep floor: {alerts:?}"
    );
}

#[test]
fn month_over_month_cycle_growth_fires() {
    let store = fresh_store("cycle");
    // January closes took 30 days, February closes 58: +93%, far past the
    // 15% trigger.
    for i in 0..2 {
        seed(&store, &format!("M1W{i}"), "RepA", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-01-31"), 10_000);
    }
    for i in 0..2 {
        seed(&store, &format!("M2W{i}"), "RepA", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-02-28"), 10_000);
    }

    let alerts = detector(store).detect(a_day());
    let cycle = alerts
        .iter()
        .find(|a| a.kind == AlertKind::CycleLengthening)
        .expect("93% cycle growth must fire");
    assert_eq!(cycle.severity, Severity::Warning);
    assert!(cycle.message.contains("30 days"), "message was: {}", cycle.message);
    assert!(cycle.message.contains("58 days"), "message was: {}", cycle.message);
}

#[test]
fn one_rep_carrying_the_revenue_fires_concentration() {
    let store = fresh_store("concentration");
    // RepA closes 100k, four teammates 1k each: only 1 of 5 reps above
    // the mean, well under the 40% floor.
    seed(&store, "A1", "RepA", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-02-01"), 100_000);
    for (i, rep) in ["RepB", "RepC", "RepD", "RepE"].iter().enumerate() {
        seed(&store, &format!("T{i}"), rep, "GTX Basic", "Won", Some("2017-01-01"), Some("2017-02-01"), 1_000);
    }

    let alerts = detector(store).detect(a_day());
    let conc = alerts
        .iter()
        .find(|a| a.kind == AlertKind::RepConcentration)
        .expect("1 of 5 above the mean must fire");
    assert_eq!(conc.severity, Severity::Critical);
    assert!(conc.message.contains("1 of 5"), "message was: {}", conc.message);
}

#[test]
fn a_product_dwarfing_the_runner_up_fires_imbalance() {
    let store = fresh_store("imbalance");
    // GTXPro brings in 10x the runner-up's revenue, past the 3x trigger.
    for i in 0..2 {
        seed(&store, &format!("P{i}"), "RepA", "GTXPro", "Won", Some("2017-01-01"), Some("2017-02-01"), 50_000);
    }
    seed(&store, "B1", "RepB", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-02-01"), 10_000);

    let alerts = detector(store).detect(a_day());
    let imbalance = alerts
        .iter()
        .find(|a| a.kind == AlertKind::ProductImbalance)
        .expect("10x revenue gap must fire");
    assert_eq!(imbalance.severity, Severity::Warning);
    assert!(imbalance.message.contains("GTXPro"), "message was: {}", imbalance.message);
}

#[test]
fn a_new_rep_far_past_the_average_ramp_fires() {
    let store = fresh_store("ramp");
    // Veteran hit a first win in 10 days; the rookie took 70 against a
    // 40-day average, past the 1.5x trigger. With `now` at 2017-08-01 the
    // rookie has 92 days of tenure, the veteran 212.
    seed(&store, "V1", "Veteran", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-01-11"), 10_000);
    seed(&store, "R1", "Rookie", "GTX Basic", "Won", Some("2017-05-01"), Some("2017-07-10"), 10_000);

    let now = NaiveDate::from_ymd_opt(2017, 8, 1).unwrap();
    let alerts = detector(store).detect(now);
    let ramp = alerts
        .iter()
        .find(|a| a.kind == AlertKind::SlowRamp)
        .expect("70 days against a 40-day average must fire");
    assert_eq!(ramp.severity, Severity::Warning);
    assert!(ramp.message.contains("Rookie"), "message was: {}", ramp.message);
    assert!(ramp.message.contains("70 days"), "message was: {}", ramp.message);
}

#[test]
fn a_collapsed_quarter_fires_the_seasonal_rule() {
    let store = fresh_store("seasonal");
    // Q1 closed 100k, Q2 only 20k: under 75% of the prior quarter.
    for i in 0..5 {
        seed(&store, &format!("Q1W{i}"), "RepA", "GTX Basic", "Won", Some("2017-01-01"), Some("2017-02-01"), 20_000);
    }
    seed(&store, "Q2W0", "RepA", "GTX Basic", "Won", Some("2017-04-01"), Some("2017-05-01"), 20_000);

    let alerts = detector(store).detect(a_day());
    let seasonal = alerts
        .iter()
        .find(|a| a.kind == AlertKind::SeasonalDrop)
        .expect("an 80% revenue drop must fire");
    assert_eq!(seasonal.severity, Severity::Critical);
    assert!(seasonal.message.contains("2017-Q2"), "message was: {}", seasonal.message);
}

#[test]
fn heavy_recent_discounting_fires() {
    let store = fresh_store("discount");
    // Historical average won value is pulled up by full-price wins; then
    // inside the 90-day window ending at the reference date, half of the
    // closes come in far below it.
    for i in 0..4 {
        seed(&store, &format!("F{i}"), "RepA", "GTX Basic", "Won", Some("2017-08-01"), Some("2017-11-15"), 100_000);
    }
    for i in 0..4 {
        seed(&store, &format!("D{i}"), "RepZ", "GTX Basic", "Won", Some("2017-09-01"), Some("2017-12-01"), 20_000);
    }

    let alerts = detector(store).detect(a_day());
    let discount = alerts
        .iter()
        .find(|a| a.kind == AlertKind::DiscountFrequency)
        .expect("4 of 8 discounted must fire");
    assert_eq!(discount.severity, Severity::Critical);
    assert!(discount.message.contains("4 of 8"), "message was: {}", discount.message);
}
