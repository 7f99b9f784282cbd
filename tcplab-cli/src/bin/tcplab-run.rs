//! tcplab-run - drive one simulated TCP session from the terminal
//!
//! Runs handshake, bulk transfer, and teardown between the simulated
//! client and server, then prints a transfer report. Link conditions and
//! the congestion algorithm come from flags or a TOML scenario file.
//!
//! Examples:
//!   tcplab-run --loss 0.1 --algorithm cubic --payloads 50
//!   tcplab-run --config lossy.toml --verbose
//!   tcplab-run --write-example lossy.toml

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use tcplab::{Algorithm, ConnectionState, Endpoint, LinkConfig, Simulator, SimulatorConfig};
use tcplab_cli::config::ScenarioConfig;
use tcplab_cli::stats::{format_bytes, format_duration, format_rtt};

#[derive(Parser, Debug)]
#[command(name = "tcplab-run")]
#[command(about = "Educational TCP simulator", long_about = None)]
struct Args {
    /// Scenario TOML file; individual flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// One-way link delay in seconds (0 to 5)
    #[arg(long)]
    delay: Option<f64>,

    /// Per-segment loss probability (0 to 1)
    #[arg(long)]
    loss: Option<f64>,

    /// Link bandwidth in KB/s
    #[arg(long)]
    bandwidth: Option<f64>,

    /// Congestion algorithm: Reno, NewReno, Cubic, BBR
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Number of payloads the client sends
    #[arg(short, long)]
    payloads: Option<usize>,

    /// Size of each payload in bytes
    #[arg(long)]
    payload_size: Option<usize>,

    /// Virtual clock step in seconds
    #[arg(long)]
    step: Option<f64>,

    /// Simulated time budget in seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Seed for the link loss draw (reproducible runs)
    #[arg(long)]
    seed: Option<u64>,

    /// Write an example scenario file and exit
    #[arg(long)]
    write_example: Option<PathBuf>,

    /// Verbose output (per-segment trace)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    if let Some(path) = &args.write_example {
        ScenarioConfig::example()
            .to_file(path)
            .with_context(|| format!("writing example scenario to {}", path.display()))?;
        tracing::info!("Example scenario written to {}", path.display());
        return Ok(());
    }

    let mut scenario = match &args.config {
        Some(path) => ScenarioConfig::from_file(path)
            .with_context(|| format!("loading scenario {}", path.display()))?,
        None => ScenarioConfig::default(),
    };
    apply_overrides(&mut scenario, &args);

    let algorithm: Algorithm = scenario.run.algorithm.parse()?;
    let config = SimulatorConfig {
        link: LinkConfig {
            delay_s: scenario.link.delay_s,
            loss_rate: scenario.link.loss_rate,
            bandwidth_kb_per_s: scenario.link.bandwidth_kb_per_s,
        },
        algorithm,
        ..SimulatorConfig::default()
    };
    let mut sim = match scenario.run.seed {
        Some(seed) => Simulator::with_seed(config, seed)?,
        None => Simulator::new(config)?,
    };

    tracing::info!(
        "Starting simulation: {} | delay {}s loss {} bandwidth {} KB/s",
        algorithm,
        scenario.link.delay_s,
        scenario.link.loss_rate,
        scenario.link.bandwidth_kb_per_s
    );

    let step = scenario.run.step_s;

    // Three-way handshake.
    sim.start_connection()?;
    if !sim.run_until(|s| s.established(), step, scenario.run.duration_s) {
        bail!("handshake did not complete within {}s", scenario.run.duration_s);
    }
    tracing::info!("Connection established at t={}", sim.now());

    // Bulk transfer: queue everything up front and let the window and the
    // pacer meter it out.
    let payload = Bytes::from(vec![b'x'; scenario.run.payload_size]);
    for _ in 0..scenario.run.payload_count {
        sim.send_data(payload.clone(), true);
    }
    let transfer_start = sim.now();
    let drained = sim.run_until(
        |s| s.client().unacked_data() == 0 && s.client().queued() == 0,
        step,
        scenario.run.duration_s,
    );
    if drained {
        tracing::info!(
            "Transfer of {} payloads finished in {}",
            scenario.run.payload_count,
            format_duration(sim.now() - transfer_start)
        );
    } else {
        tracing::warn!(
            "Transfer incomplete: {} unacked, {} queued at budget end",
            sim.client().unacked_data(),
            sim.client().queued()
        );
    }

    // Four-way teardown.
    sim.close_connection(true);
    sim.run_until(
        |s| s.server().state() == ConnectionState::CloseWait,
        step,
        5.0,
    );
    sim.close_connection(false);
    sim.run_until(
        |s| s.server().state() == ConnectionState::Closed,
        step,
        5.0,
    );
    tracing::info!(
        "Final states: client {} / server {}",
        sim.client().state(),
        sim.server().state()
    );

    if args.verbose {
        for event in sim.history() {
            tracing::debug!("{:?}", event);
        }
    }

    report(&sim);
    Ok(())
}

fn apply_overrides(scenario: &mut ScenarioConfig, args: &Args) {
    if let Some(delay) = args.delay {
        scenario.link.delay_s = delay;
    }
    if let Some(loss) = args.loss {
        scenario.link.loss_rate = loss;
    }
    if let Some(bandwidth) = args.bandwidth {
        scenario.link.bandwidth_kb_per_s = bandwidth;
    }
    if let Some(algorithm) = &args.algorithm {
        scenario.run.algorithm = algorithm.clone();
    }
    if let Some(payloads) = args.payloads {
        scenario.run.payload_count = payloads;
    }
    if let Some(payload_size) = args.payload_size {
        scenario.run.payload_size = payload_size;
    }
    if let Some(step) = args.step {
        scenario.run.step_s = step;
    }
    if let Some(duration) = args.duration {
        scenario.run.duration_s = duration;
    }
    if args.seed.is_some() {
        scenario.run.seed = args.seed;
    }
}

fn report(sim: &Simulator) {
    let client = sim.client_stats();
    let server = sim.server_stats();
    let vars = sim.client().congestion_vars();
    let rtt = sim.client().rtt();
    let losses = sim.loss_events().len();

    println!();
    println!("=== Transfer report (t={}) ===", sim.now());
    println!(
        "  client: {} segments / {} sent, {} received, {} retransmissions, {} dup ACKs",
        client.packets_sent,
        format_bytes(client.bytes_sent),
        client.packets_received,
        client.retransmissions,
        client.duplicate_acks
    );
    println!(
        "  server: {} segments / {} sent, {} received, {} retransmissions",
        server.packets_sent,
        format_bytes(server.bytes_sent),
        server.packets_received,
        server.retransmissions
    );
    println!("  link:   {} segments lost", losses);
    println!(
        "  cwnd {:.2} / ssthresh {:.2} / phase {}",
        vars.cwnd, vars.ssthresh, vars.phase
    );
    match rtt.srtt() {
        Some(srtt) => println!(
            "  srtt {} / rto {}",
            format_rtt(srtt),
            format_rtt(rtt.rto())
        ),
        None => println!("  srtt: no samples / rto {}", format_rtt(rtt.rto())),
    }

    let cwnd_trace = sim.metric_trace(Endpoint::Client, tcplab::protocol::Metric::Cwnd);
    if let Some(peak) = cwnd_trace
        .iter()
        .map(|(value, _)| *value)
        .fold(None, |max: Option<f64>, v| {
            Some(max.map_or(v, |m| m.max(v)))
        })
    {
        println!("  peak cwnd {:.2} over {} samples", peak, cwnd_trace.len());
    }
}
