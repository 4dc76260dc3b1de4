use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use revops_engine::admin::Admin;
use revops_engine::alerts::AlertDetector;
use revops_engine::config::Config;
use revops_engine::ingest;
use revops_engine::investigate::Investigator;
use revops_engine::metrics::Metrics;
use revops_engine::responder;
use revops_engine::session::Session;
use revops_engine::store::Store;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "revops")]
#[command(about = "Revenue intelligence engine over the sales pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load (or reload) the pipeline table from a source CSV
    Load {
        /// Override the configured source CSV path
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Print the headline KPI dashboard
    Dashboard,
    /// Run every alert rule and print what fires
    Alerts,
    /// Investigate a fired alert by tag (e.g. win_rate_decline)
    Investigate { tag: String },
    /// Ask a free-text question
    Ask {
        prompt: String,
        /// Use the metered live responder instead of the demo router
        #[arg(long)]
        live: bool,
        /// Admin secret, required for --live
        #[arg(long)]
        secret: Option<String>,
    },
    /// Secret-gated dataset mutations
    Admin {
        #[arg(long)]
        secret: String,
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Force-close the N oldest open deals as won
    CloseDeals { n: usize },
    /// Mark the N oldest open deals as lost
    MarkLost { n: usize },
    /// Inject N fresh demo opportunities
    AddOpportunities { n: usize },
    /// Seed starter deals for a new agent
    Hire { name: String },
    /// Remove an agent and all their deals
    Fire { name: String },
    /// Reload the table from the source CSV, discarding mutations
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env();
    let store = Store::open(&config.db_path);
    ingest::ensure_schema(&store)?;

    let metrics = Metrics::new(store.clone());
    let today = Utc::now().date_naive();

    match args.command {
        Command::Load { csv } => {
            let path = csv.unwrap_or_else(|| config.source_csv.clone());
            let loaded = ingest::reset_from_source(&store, &path)?;
            println!("Loaded {loaded} opportunities from {}", path.display());
        }
        Command::Dashboard => print_dashboard(&metrics, &config),
        Command::Alerts => {
            let detector = AlertDetector::new(metrics, config.thresholds.clone());
            let alerts = detector.detect(today);
            if alerts.is_empty() {
                println!("✅ No alerts. All monitored signals look healthy.");
            } else {
                println!("🚨 {} alert(s):\n", alerts.len());
                for alert in &alerts {
                    println!("[{}] {}\n    {}\n", alert.severity, alert.title, alert.message);
                }
            }
        }
        Command::Investigate { tag } => {
            let investigator = Investigator::new(metrics, config.thresholds.clone());
            match investigator.investigate(&tag, today) {
                Some(report) => {
                    println!("{report}");
                    if config.api_key.is_some() {
                        let mut session = Session::new();
                        session.last_investigation = Some(report);
                        let actions =
                            responder::recommend(config.api_key.as_deref(), &mut session).await;
                        println!("Recommended actions:\n{actions}");
                    }
                }
                None => println!("No investigation available for '{tag}'."),
            }
        }
        Command::Ask {
            prompt,
            live,
            secret,
        } => {
            let mut session = Session::new();
            session.push_user(prompt.clone());
            let answer = if live {
                let authorized = matches!(
                    (config.admin_secret.as_deref(), secret.as_deref()),
                    (Some(expected), Some(given)) if expected == given
                );
                if !authorized {
                    "❌ Error: live mode requires a valid admin secret.".to_string()
                } else {
                    session.demo_mode = false;
                    responder::live_response(&metrics, config.api_key.as_deref(), &mut session, &prompt)
                        .await
                }
            } else {
                responder::demo_response(&metrics, &prompt)
            };
            session.push_assistant(answer.clone());
            println!("{answer}");
        }
        Command::Admin { secret, action } => {
            let admin = Admin::new(&store, &config);
            info!("admin action requested");
            let touched = match action {
                AdminAction::CloseDeals { n } => admin.close_deals(&secret, n)?,
                AdminAction::MarkLost { n } => admin.mark_lost(&secret, n)?,
                AdminAction::AddOpportunities { n } => admin.add_opportunities(&secret, n)?,
                AdminAction::Hire { name } => admin.hire_agent(&secret, &name)?,
                AdminAction::Fire { name } => admin.fire_agent(&secret, &name)?,
                AdminAction::Reset => admin.reset(&secret)?,
            };
            println!("✅ Done, {touched} row(s) affected.");
        }
    }

    Ok(())
}

fn print_dashboard(metrics: &Metrics, config: &Config) {
    println!("=== Revenue Intelligence Dashboard ===\n");

    for stage in metrics.stage_summary() {
        println!("{:<10} {:>7} deals   ${:>14.0}", stage.stage, stage.count, stage.value);
    }

    let win = metrics.win_rate();
    let open = metrics.open_pipeline();
    println!("\nWin rate:            {:.1}%", win.win_rate_pct);
    println!("Open deals:          {}", open.count);
    println!("Est. pipeline value: ${:.0}", metrics.estimated_pipeline_value());
    println!("Avg won deal:        ${:.0}", metrics.avg_won_deal_value());
    println!("Monthly revenue:     ${:.0}", metrics.monthly_revenue());
    println!("Pipeline coverage:   {:.1}x monthly revenue", metrics.pipeline_coverage());

    if let Some(cycle) = metrics.sales_cycle() {
        println!(
            "Sales cycle:         {:.0} days avg ({}..{})",
            cycle.avg_days, cycle.min_days, cycle.max_days
        );
    }

    let cost = metrics.cost_of_sales(config.thresholds.cost_per_attempt);
    println!(
        "Cost proxy:          {} attempts, ${:.0} est. cost, {:.1}x return",
        cost.closed_attempts, cost.estimated_cost, cost.return_per_cost_unit
    );
}
