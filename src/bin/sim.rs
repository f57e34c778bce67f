use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use connector_recovery::{
    config::{Config, read_config_file},
    events::{EventSink, Presenter, spawn_presenter},
    scenario::Scenario,
    util::get_connector_id,
};
use tracing::{debug, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_CONNECTOR_ID: &str = "arn:aws:kafkaconnect:eu-central-1:000000000000:connector/cdc-source";

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file, defaults to the fast/slow comparison
    #[arg(short)]
    file: Option<String>,

    /// Override the scenario duration (in time units)
    #[arg(long)]
    duration: Option<u64>,

    /// Seed for failure timing and produced item counts
    #[arg(long)]
    seed: Option<u64>,

    /// Only run the named strategies (repeatable)
    #[arg(long)]
    strategy: Vec<String>,

    /// Print events and the report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Also show metric polls and produced items
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let events = if verbose { LevelFilter::TRACE } else { LevelFilter::DEBUG };
    let filter = filter::Targets::new().with_targets(vec![
        ("connector_recovery", LevelFilter::INFO),
        ("events", events),
        ("recovery_sim", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::comparison(get_connector_id().unwrap_or_else(|| DEMO_CONNECTOR_ID.to_string())),
    };

    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if !args.strategy.is_empty() {
        config.strategies.retain(|s| args.strategy.contains(&s.name()));
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = load_config(&args)?
        .resolve()
        .context("invalid scenario configuration")?;
    debug!("resolved config: {config:?}");

    let (sink, receiver) = EventSink::channel(config.event_buffer);
    let presenter = if args.json {
        Presenter::JsonLines
    } else {
        Presenter::Tracing
    };
    let presenter_task = spawn_presenter(receiver, presenter);

    let scenario = Scenario::start(config, sink.clone())?;
    let report = scenario.run().await;

    drop(sink);
    match tokio::time::timeout(Duration::from_secs(5), presenter_task).await {
        Ok(Ok(rendered)) => debug!("{rendered} events rendered"),
        Ok(Err(e)) => warn!("presenter failed: {e}"),
        Err(_) => warn!("presenter did not drain in time"),
    }

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{report}");
    }

    Ok(())
}
