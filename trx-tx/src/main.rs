//! trx transmitter: audio device in, audio datagrams out

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use clap::Parser;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use trx_common::audio::CpalSource;
use trx_common::codec::OpusEncoder;
use trx_common::net::UdpTransport;
use trx_common::{StartupError, TrxError, logging, sched};
use trx_tx::{Args, PttConfig, PttMonitor, TransmitPath, TransmitStats, TxConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = match TxConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => return fail(&e.into()),
    };

    info!("tx {}", env!("CARGO_PKG_VERSION"));

    let shutdown = Arc::new(AtomicBool::new(false));
    let (done_tx, mut done_rx) = oneshot::channel();

    let loop_shutdown = shutdown.clone();
    let spawned = thread::Builder::new()
        .name("transmit".into())
        .spawn(move || {
            let _ = done_tx.send(transmit(config, &loop_shutdown));
        });
    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("tx: failed to start transmit thread: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = tokio::select! {
        result = &mut done_rx => result,
        _ = shutdown_signal() => {
            info!("shutting down");
            shutdown.store(true, Ordering::Relaxed);
            (&mut done_rx).await
        }
    };
    let _ = handle.join();

    match result {
        Ok(Ok(_)) => ExitCode::SUCCESS,
        Ok(Err(e)) => fail(&e),
        Err(_) => {
            eprintln!("tx: transmit thread exited unexpectedly");
            ExitCode::FAILURE
        }
    }
}

/// Start the PTT watcher for `config`
fn start_ptt(config: &PttConfig) -> Result<PttMonitor, StartupError> {
    let input = config.open()?;

    PttMonitor::builder(input)
        .on_pressed(|| debug!("PTT pressed"))
        .on_released(|| debug!("PTT released"))
        .start()
        .map_err(|source| StartupError::Ptt {
            device: format!("{:?}", config.source),
            source,
        })
}

/// Open everything, enter realtime scheduling, and send until told to stop
fn transmit(config: TxConfig, shutdown: &AtomicBool) -> Result<TransmitStats, TrxError> {
    let transport = UdpTransport::connect(&config.host, config.port)?;
    let encoder = OpusEncoder::new(&config.audio).map_err(StartupError::from)?;
    let source = CpalSource::open(&config.audio)?;

    let monitor = config.ptt.as_ref().map(start_ptt).transpose()?;
    if monitor.is_none() {
        debug!("PTT disabled, transmitting continuously");
    }

    info!(
        host = %config.host,
        port = config.port,
        device = %config.audio.device,
        rate = config.audio.rate,
        channels = config.audio.channels,
        frame = config.audio.frame,
        payload = config.audio.payload_len(),
        "sending"
    );

    sched::go_realtime(config.priority)?;

    let mut path = TransmitPath::new(
        config.transmit(),
        transport,
        encoder,
        source,
        monitor.as_ref().map(PttMonitor::handle),
    );
    let result = path.run(shutdown);

    let stats = path.stats();
    info!(
        cycles = stats.cycles,
        sent = stats.sent,
        muted = stats.muted,
        skipped = stats.skipped,
        short_reads = stats.short_reads,
        recovered = stats.recovered,
        send_errors = stats.send_errors,
        "transmit finished"
    );

    if let Some(monitor) = monitor {
        monitor.shutdown();
    }

    result
}

/// Report a fatal error naming the failing subsystem
fn fail(e: &TrxError) -> ExitCode {
    eprintln!("tx: {} failed: {}", e.subsystem(), e);
    ExitCode::FAILURE
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("failed to install signal handlers: {}", e);
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
