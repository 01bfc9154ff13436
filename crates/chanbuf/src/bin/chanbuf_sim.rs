//! # chanbuf Overload Simulator
//!
//! Drives one connection over an in-memory transport that accepts a limited
//! number of packets per tick, so the coalescing, queueing and backpressure
//! behaviour of each channel can be watched without a network.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: reliable channel 0, unreliable channel 1, 1500-byte packets
//! chanbuf-sim --ticks 200 --rate 40 --size 120 --budget 2
//!
//! # Channel layout from TOML
//! chanbuf-sim --config channels.toml
//!
//! # Per-channel debug logging
//! RUST_LOG=chanbuf=debug chanbuf-sim
//! ```

use std::time::Duration;

use chanbuf::config::ConnectionConfig;
use chanbuf::transport::ThrottledTransport;
use chanbuf::{ChannelError, Connection};
use serde::Serialize;

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("cannot read config '{}': {}", path, e))?;
            ConnectionConfig::from_toml_str(&text)?
        }
        None => ConnectionConfig::default(),
    };

    tracing::info!(
        ticks = args.ticks,
        rate = args.rate,
        size = args.size,
        budget = args.budget,
        channels = config.channels.len(),
        "chanbuf-sim starting"
    );

    // ── Connection ──────────────────────────────────────────────
    let transport = ThrottledTransport::with_budget(args.budget);
    let mut conn = Connection::new(transport, &config)?;
    let channel_ids: Vec<u8> = conn.channel_ids().collect();
    let payload = vec![0xA5u8; args.size];

    let mut rejected = 0u64;
    for tick in 0..args.ticks {
        conn.transport_mut().refill();
        for &channel_id in &channel_ids {
            for _ in 0..args.rate {
                match conn.send(channel_id, 1, payload.as_slice()) {
                    Ok(()) => {}
                    Err(e) if e.is_drop() => rejected += 1,
                    Err(e @ ChannelError::MessageTooLarge { .. }) => return Err(e.into()),
                    Err(e) => tracing::warn!(channel_id, error = %e, "send failed"),
                }
            }
        }
        conn.update();
        if tick % 50 == 0 {
            for stats in conn.all_stats() {
                tracing::debug!(
                    tick,
                    channel_id = stats.channel_id,
                    pending = stats.pending_packets,
                    dropped = stats.dropped_msgs,
                    broken = stats.broken,
                    "channel status"
                );
            }
        }
        std::thread::sleep(Duration::from_millis(args.tick_ms));
    }

    // Let the transport catch up before reporting.
    conn.transport_mut().set_budget(None);
    conn.flush_channels();
    conn.flush_channels();

    let report = Report {
        channels: conn.all_stats(),
        pool: conn.pool().stats(),
        packets_delivered: conn.transport().sent().len(),
        transport_rejections: conn.transport().rejections(),
        rejected_sends: rejected,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    conn.close();
    tracing::info!(rejected, "chanbuf-sim finished");
    Ok(())
}

#[derive(Serialize)]
struct Report {
    channels: Vec<chanbuf::stats::ChannelStats>,
    pool: chanbuf::stats::PoolStats,
    packets_delivered: usize,
    transport_rejections: u64,
    rejected_sends: u64,
}

struct Args {
    config: Option<String>,
    ticks: u64,
    tick_ms: u64,
    rate: usize,
    size: usize,
    budget: usize,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut out = Args {
        config: None,
        ticks: 100,
        tick_ms: 5,
        rate: 20,
        size: 100,
        budget: 4,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--help" || flag == "-h" {
            print_help();
            std::process::exit(0);
        }
        i += 1;
        let val = args
            .get(i)
            .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))?;
        match flag {
            "--config" | "-c" => out.config = Some(val.clone()),
            "--ticks" | "-t" => out.ticks = parse_num(flag, val)?,
            "--tick-ms" => out.tick_ms = parse_num(flag, val)?,
            "--rate" | "-r" => out.rate = parse_num(flag, val)?,
            "--size" | "-s" => out.size = parse_num(flag, val)?,
            "--budget" | "-b" => out.budget = parse_num(flag, val)?,
            other => {
                anyhow::bail!("unknown argument: {other}\nRun with --help for usage.");
            }
        }
        i += 1;
    }

    if out.size == 0 {
        anyhow::bail!("--size must be greater than zero");
    }
    Ok(out)
}

fn parse_num<N: std::str::FromStr>(flag: &str, val: &str) -> anyhow::Result<N>
where
    N::Err: std::fmt::Display,
{
    val.parse()
        .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", val, flag, e))
}

fn print_help() {
    println!(
        "chanbuf-sim: channel buffering overload simulator

USAGE:
    chanbuf-sim [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Connection config (TOML)
    -t, --ticks <N>        Ticks to run [default: 100]
        --tick-ms <MS>     Sleep between ticks [default: 5]
    -r, --rate <N>         Messages per channel per tick [default: 20]
    -s, --size <BYTES>     Message body size [default: 100]
    -b, --budget <N>       Packets the transport accepts per tick [default: 4]
    -h, --help             Print help

ENVIRONMENT:
    RUST_LOG               Log filter [default: info]"
    );
}
