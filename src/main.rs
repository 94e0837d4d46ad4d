//! HGW Proto-Batcher
//!
//! Steady-state batching daemon: preps a target, then runs the
//! plan → fit → dispatch → land cycle forever against a pool of worker
//! hosts. Runs until externally killed; there is no shutdown command.
//!
//! Usage: protobatch <host> <target> [fraction]
//!
//! The built-in simulation stands in for the game runtime; a real
//! integration supplies its own `GameHost` implementation.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use protobatch::{
    BatcherConfig, BatcherEvent, BatchController, CapacityLedger, CostModel, GameHost, SimHost,
    StandardCostModel, Target, BATCHER_EVENT_BUS,
};

struct Args {
    host: String,
    target: String,
    fraction: Option<f64>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let host = args.next().context("usage: protobatch <host> <target> [fraction]")?;
    let target = args.next().context("usage: protobatch <host> <target> [fraction]")?;
    let fraction = match args.next() {
        Some(raw) => Some(raw.parse().context("fraction must be a number")?),
        None => None,
    };
    Ok(Args { host, target, fraction })
}

/// The ceiling comes from the loaded config, never a literal; a retuned
/// `max_fraction` and the CLI check must agree.
fn fraction_in_bounds(f: f64, max: f64) -> bool {
    f > 0.0 && f <= max
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let args = parse_args()?;

    let config = match std::env::var("PROTOBATCH_CONFIG") {
        Ok(path) => BatcherConfig::load(&path)?,
        Err(_) => BatcherConfig::default(),
    };

    if let Some(f) = args.fraction {
        if !fraction_in_bounds(f, config.max_fraction) {
            bail!("fraction must be within (0, {:.2}]", config.max_fraction);
        }
    }

    println!("\n{}", "═".repeat(60));
    println!("⚡ HGW Proto-Batcher v0.2.0");
    println!("{}", "═".repeat(60));
    println!("Pool: {} | Target: {}", args.host, args.target);
    println!("{}\n", "═".repeat(60));

    let model = Arc::new(StandardCostModel::new(config.cost.clone()));

    // Demo pool: the simulation plays the game runtime's part.
    let sim = SimHost::new(model.clone(), 100);
    sim.add_worker(args.host.clone(), 4_096.0).await;
    sim.add_target(Target {
        id: args.target.clone(),
        money_available: 400_000.0,
        money_max: 1_000_000.0,
        security_current: 8.0,
        security_min: 1.0,
        required_capability: 1,
    })
    .await;

    let ledger = Arc::new(CapacityLedger::new());
    ledger.register_host(args.host.clone(), sim.query_capacity(&args.host).await?);

    // Mirror batch lifecycle events into the log.
    let mut events = BATCHER_EVENT_BUS.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BatcherEvent::BatchLanded { target, extracted, .. } => {
                    info!(%target, extracted, "💰 batch landed");
                }
                other => info!(event = ?other, "batcher event"),
            }
        }
    });

    let mut controller = BatchController::new(
        Arc::new(sim) as Arc<dyn GameHost>,
        model as Arc<dyn CostModel>,
        ledger,
        config,
    );
    if let Some(f) = args.fraction {
        controller = controller.with_fraction_cap(f);
    }

    // Runs forever; only a vanished target breaks out.
    controller.run(&args.target).await?;
    Ok(())
}
