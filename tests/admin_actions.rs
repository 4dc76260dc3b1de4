use revops_engine::admin::Admin;
use revops_engine::config::{Config, Thresholds};
use revops_engine::ingest;
use revops_engine::metrics::Metrics;
use revops_engine::store::Store;
use rusqlite::params;
use std::io::Write;
use std::path::PathBuf;

const SECRET: &str = "open-sesame";

fn fresh_store(tag: &str) -> Store {
    let path = std::env::temp_dir().join(format!("revops_admin_{}_{}.db", tag, std::process::id()));
    let _ = std::fs::remove_file(&path);
    let store = Store::open(&path);
    ingest::ensure_schema(&store).expect("schema should apply");
    store
}

fn config_with_secret(csv: PathBuf) -> Config {
    Config {
        db_path: PathBuf::from("unused.db"),
        source_csv: csv,
        api_key: None,
        admin_secret: Some(SECRET.to_string()),
        thresholds: Thresholds::default(),
    }
}

fn seed(
    store: &Store,
    id: &str,
    agent: &str,
    stage: &str,
    engage: Option<&str>,
    close: Option<&str>,
    value: i64,
) {
    store
        .execute(
            "INSERT INTO sales_pipeline
             (opportunity_id, sales_agent, product, account, deal_stage, engage_date, close_date, close_value)
             VALUES (?1, ?2, 'GTX Basic', 'Acme Corp', ?3, ?4, ?5, ?6)",
            params![id, agent, stage, engage, close, value],
        )
        .expect("insert should succeed");
}

fn stage_counts(metrics: &Metrics) -> (i64, i64, i64) {
    let mut open = 0;
    let mut won = 0;
    let mut lost = 0;
    for s in metrics.stage_summary() {
        match s.stage.as_str() {
            "Engaging" => open = s.count,
            "Won" => won = s.count,
            "Lost" => lost = s.count,
            _ => {}
        }
    }
    (open, won, lost)
}

#[test]
fn the_wrong_secret_is_refused_before_anything_runs() {
    let store = fresh_store("secret");
    seed(&store, "O1", "RepA", "Engaging", Some("2017-01-01"), None, 0);
    let config = config_with_secret(PathBuf::from("unused.csv"));
    let admin = Admin::new(&store, &config);

    assert!(admin.close_deals("wrong", 1).is_err());
    assert!(admin.fire_agent("", "RepA").is_err());
    // The refused mutation must not have touched the data.
    let metrics = Metrics::new(store);
    assert_eq!(stage_counts(&metrics), (1, 0, 0));
}

#[test]
fn closing_deals_conserves_the_total_and_stamps_the_close() {
    let store = fresh_store("close");
    for i in 0..5 {
        seed(&store, &format!("O{i}"), "RepA", "Engaging", Some("2017-01-01"), None, 0);
    }
    seed(&store, "W0", "RepA", "Won", Some("2016-12-01"), Some("2017-01-15"), 9_000);

    let config = config_with_secret(PathBuf::from("unused.csv"));
    let admin = Admin::new(&store, &config);
    let closed = admin.close_deals(SECRET, 2).expect("close should succeed");
    assert_eq!(closed, 2);

    let metrics = Metrics::new(store.clone());
    assert_eq!(stage_counts(&metrics), (3, 3, 0));

    // The forced closes carry the standard value and a real close date.
    let rows = store
        .query(
            "SELECT COUNT(*) FROM sales_pipeline
             WHERE deal_stage = 'Won' AND close_value = 50000 AND close_date IS NOT NULL",
        )
        .expect("count query");
    assert_eq!(rows[0][0].as_i64(), 2);
}

#[test]
fn marking_lost_keeps_the_recorded_value() {
    let store = fresh_store("lost");
    // Synthetic injected rows carry a recorded value while open; losing
    // them must not rewrite it.
    for i in 0..3 {
        seed(&store, &format!("O{i}"), "RepA", "Engaging", Some("2017-01-01"), None, 75_000);
    }
    let config = config_with_secret(PathBuf::from("unused.csv"));
    let admin = Admin::new(&store, &config);
    assert_eq!(admin.mark_lost(SECRET, 2).expect("mark lost"), 2);

    let metrics = Metrics::new(store.clone());
    assert_eq!(stage_counts(&metrics), (1, 0, 2));

    let rows = store
        .query(
            "SELECT COUNT(*) FROM sales_pipeline
             WHERE deal_stage = 'Lost' AND close_value = 75000 AND close_date IS NOT NULL",
        )
        .expect("count query");
    assert_eq!(rows[0][0].as_i64(), 2);
}

#[test]
fn injected_opportunities_land_open_on_the_demo_product() {
    let store = fresh_store("inject");
    seed(&store, "W0", "RepA", "Won", Some("2016-12-01"), Some("2017-01-15"), 9_000);

    let config = config_with_secret(PathBuf::from("unused.csv"));
    let admin = Admin::new(&store, &config);
    assert_eq!(admin.add_opportunities(SECRET, 3).expect("inject"), 3);

    let rows = store
        .query(
            "SELECT COUNT(*) FROM sales_pipeline
             WHERE deal_stage = 'Engaging' AND product = 'GTXPro'
               AND account = 'New Demo Account' AND close_value = 75000
               AND sales_agent = 'RepA'",
        )
        .expect("count query");
    assert_eq!(rows[0][0].as_i64(), 3);
}

#[test]
fn injection_refuses_an_empty_roster() {
    let store = fresh_store("roster");
    let config = config_with_secret(PathBuf::from("unused.csv"));
    let admin = Admin::new(&store, &config);
    assert!(admin.add_opportunities(SECRET, 1).is_err());
}

#[test]
fn hire_seeds_starter_deals_and_fire_removes_every_trace() {
    let store = fresh_store("hirefire");
    seed(&store, "W0", "RepA", "Won", Some("2016-12-01"), Some("2017-01-15"), 9_000);

    let config = config_with_secret(PathBuf::from("unused.csv"));
    let admin = Admin::new(&store, &config);
    let seeded = admin.hire_agent(SECRET, "Rookie").expect("hire");
    assert_eq!(seeded, 3);

    let rows = store
        .query("SELECT COUNT(*) FROM sales_pipeline WHERE sales_agent = 'Rookie'")
        .expect("count query");
    assert_eq!(rows[0][0].as_i64(), 3);

    let removed = admin.fire_agent(SECRET, "Rookie").expect("fire");
    assert_eq!(removed, 3);
    let rows = store
        .query("SELECT COUNT(*) FROM sales_pipeline WHERE sales_agent = 'Rookie'")
        .expect("count query");
    assert_eq!(rows[0][0].as_i64(), 0);
    // The rest of the data is untouched.
    let rows = store
        .query("SELECT COUNT(*) FROM sales_pipeline")
        .expect("count query");
    assert_eq!(rows[0][0].as_i64(), 1);
}

#[test]
fn reset_reloads_the_table_from_the_source_csv() {
    let csv_path = std::env::temp_dir().join(format!("revops_admin_reset_{}.csv", std::process::id()));
    let mut file = std::fs::File::create(&csv_path).expect("temp csv");
    writeln!(file, "opportunity_id,sales_agent,product,account,deal_stage,engage_date,close_date,close_value").unwrap();
    writeln!(file, "CSV00001,RepA,GTX Basic,Acme Corp,Won,2017-01-01,2017-02-01,12000").unwrap();
    writeln!(file, "CSV00002,RepB,GTXPro,,Engaging,2017-03-01,,").unwrap();
    drop(file);

    let store = fresh_store("reset");
    // Mutated state that reset must throw away.
    for i in 0..10 {
        seed(&store, &format!("O{i}"), "RepZ", "Engaging", Some("2017-01-01"), None, 0);
    }

    let config = config_with_secret(csv_path);
    let admin = Admin::new(&store, &config);
    let loaded = admin.reset(SECRET).expect("reset");
    assert_eq!(loaded, 2);

    let rows = store
        .query("SELECT COUNT(*) FROM sales_pipeline")
        .expect("count query");
    assert_eq!(rows[0][0].as_i64(), 2);
    // The blank close_value in the CSV came through as 0, not NULL.
    let rows = store
        .query("SELECT close_value FROM sales_pipeline WHERE opportunity_id = 'CSV00002'")
        .expect("value query");
    assert_eq!(rows[0][0].as_i64(), 0);
}
