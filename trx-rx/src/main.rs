//! trx receiver: audio datagrams in, audio device out

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use clap::Parser;
use tokio::sync::oneshot;
use tracing::{info, warn};
use trx_common::audio::CpalSink;
use trx_common::codec::OpusDecoder;
use trx_common::net::UdpTransport;
use trx_common::{StartupError, TrxError, logging, sched};
use trx_rx::{Args, PlayoutDriver, PlayoutStats, RxConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = match RxConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => return fail(&e.into()),
    };

    info!("rx {}", env!("CARGO_PKG_VERSION"));

    let shutdown = Arc::new(AtomicBool::new(false));
    let (done_tx, mut done_rx) = oneshot::channel();

    let loop_shutdown = shutdown.clone();
    let spawned = thread::Builder::new()
        .name("playout".into())
        .spawn(move || {
            let _ = done_tx.send(receive(config, &loop_shutdown));
        });
    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("rx: failed to start playout thread: {}", e);
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
            eprintln!("rx: playout thread exited unexpectedly");
            ExitCode::FAILURE
        }
    }
}

/// Open everything, enter realtime scheduling, and play until told to stop
fn receive(config: RxConfig, shutdown: &AtomicBool) -> Result<PlayoutStats, TrxError> {
    let transport = UdpTransport::bind(config.listen)?;
    let decoder = OpusDecoder::new(&config.audio).map_err(StartupError::from)?;
    let sink = CpalSink::open(&config.audio)?;

    info!(
        listen = %config.listen,
        device = %config.audio.device,
        rate = config.audio.rate,
        channels = config.audio.channels,
        frame = config.audio.frame,
        payload = config.audio.payload_len(),
        "receiving"
    );

    sched::go_realtime(config.priority)?;

    let mut driver = PlayoutDriver::new(config.playout(), transport, decoder, sink);
    let result = driver.run(shutdown);

    let stats = driver.stats();
    let ingest = driver.ingest_stats();
    info!(
        cycles = stats.cycles,
        played = stats.played,
        concealed = stats.concealed,
        short_writes = stats.short_writes,
        recovered = stats.recovered,
        "playout finished"
    );
    info!(
        received = ingest.received,
        accepted = ingest.accepted,
        restarts = ingest.restarts,
        malformed = ingest.malformed,
        late = ingest.late,
        early = ingest.early,
        duplicate = ingest.duplicate,
        "network"
    );

    result
}

/// Report a fatal error naming the failing subsystem
fn fail(e: &TrxError) -> ExitCode {
    eprintln!("rx: {} failed: {}", e.subsystem(), e);
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
