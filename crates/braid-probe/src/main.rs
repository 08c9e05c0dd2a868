mod connection;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use braid_multipath::{is_same_version, AddressHelper, Config, Scheduler, UdpAddressHelper};
use clap::Parser;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use connection::LoopbackConnection;

#[derive(Parser, Debug)]
#[command(
    name = "braid-probe",
    about = "braid-probe - send datagrams round-robin over every local/remote address pair"
)]
struct Args {
    #[arg(long = "local", short = 'l', required = true)]
    local: Vec<SocketAddr>,
    #[arg(long = "remote", short = 'r', required = true)]
    remote: Vec<SocketAddr>,
    #[arg(long = "count", short = 'n', default_value_t = 10)]
    count: usize,
    #[arg(long = "payload", short = 'p', default_value = "braid-probe")]
    payload: String,
    #[arg(long = "send-timeout-ms", default_value_t = 5000)]
    send_timeout_ms: u64,
    #[arg(long = "interval-ms", default_value_t = 100)]
    interval_ms: u64,
}

fn main() {
    init_logging();
    let args = Args::parse();

    let runtime = Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("Failed to build Tokio runtime");

    match runtime.block_on(run_probe(&args)) {
        Ok(0) => std::process::exit(0),
        Ok(failures) => {
            warn!("{} of {} sends failed", failures, args.count);
            std::process::exit(1);
        }
        Err(err) => {
            tracing::error!("Probe error: {}", err);
            std::process::exit(2);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .without_time()
        .try_init();
}

fn build_config(args: &Args) -> Config {
    Config::new().with_send_timeout(Duration::from_millis(args.send_timeout_ms))
}

/// Returns the number of failed sends.
async fn run_probe(args: &Args) -> braid_multipath::Result<usize> {
    let helper = Arc::new(UdpAddressHelper::with_addresses(args.local.iter().copied()));
    let (initial_local, initial_remote) = initial_pair(&args.local, &args.remote)?;
    let initial_transport = helper.open_socket(initial_local, initial_remote)?;
    let connection = LoopbackConnection::established();

    let scheduler = Arc::new(Scheduler::new(
        build_config(args),
        initial_transport,
        initial_local,
        initial_remote,
        connection.clone(),
        helper.clone(),
    )?);
    let listener = scheduler.listen_for_address_changes();

    for remote in &args.remote {
        scheduler.add_remote_address(*remote);
    }
    scheduler.initialize_paths();
    scheduler.announce_local_addresses()?;
    for path in scheduler.paths() {
        info!(
            "path {}{}",
            path.path_id,
            if path.is_primary { " (primary)" } else { "" }
        );
    }

    let mut failures = 0;
    for seq in 0..args.count {
        let payload = format!("{} {}", args.payload, seq);
        if let Err(err) = scheduler.send(payload.as_bytes()).await {
            warn!("send {} failed: {}", seq, err);
            failures += 1;
        }
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    for event in scheduler.drain_path_events() {
        info!("event {:?}", event);
    }
    info!(
        "sent {} datagrams over {} paths, {} control frames queued",
        args.count - failures,
        scheduler.path_count(),
        connection.frames_sent()
    );
    listener.shutdown().await;
    Ok(failures)
}

/// The first local/remote pair of matching IP version.
fn initial_pair(
    locals: &[SocketAddr],
    remotes: &[SocketAddr],
) -> braid_multipath::Result<(SocketAddr, SocketAddr)> {
    locals
        .iter()
        .flat_map(|local| remotes.iter().map(move |remote| (*local, *remote)))
        .find(|(local, remote)| is_same_version(local, remote))
        .ok_or_else(|| {
            braid_multipath::Error::Config(
                "no local/remote address pair of the same IP version".to_string(),
            )
        })
}
