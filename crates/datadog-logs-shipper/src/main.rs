// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use datadog_logs_batcher::callbacks::Callbacks;
use datadog_logs_batcher::config::BatcherConfig;
use datadog_logs_batcher::shipper::LogShipper;
use datadog_logs_batcher::shutdown::shutdown_signal;

const RECORD_CHANNEL_CAPACITY: usize = 1000;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
pub async fn main() {
    let config = BatcherConfig::from_env();
    let log_level = config
        .as_ref()
        .map_or_else(|_| "info".to_string(), |c| c.log_level.clone());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}. Shutting down log shipper.");
            return;
        }
    };

    let callbacks = Callbacks::new()
        .with_on_error(|e, items| {
            error!("{e} ({} logs affected)", items.map_or(0, <[_]>::len));
        })
        .with_on_debug(|message| debug!("{message}"))
        .with_on_init(|| info!("Log shipper ready, reading logs from stdin"));

    let shipper = match LogShipper::with_intake(&config, callbacks) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Failed to start log shipper: {e}");
            return;
        }
    };
    shipper.start();

    let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
    tokio::spawn(read_stdin(tx));

    // A signal stops reading stdin. Records already queued are still ingested.
    let stop = CancellationToken::new();
    let signalled = stop.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signalled.cancel();
    });

    let accepted = shipper.consume_until(rx, stop).await;
    debug!("Stopped reading input after {accepted} logs");

    shipper.shutdown();
    if !shipper.wait_for_deliveries(SHUTDOWN_TIMEOUT).await {
        warn!("Timed out waiting for in-flight deliveries, some logs may be lost");
    }
}

/// Forwards newline-delimited JSON from stdin until EOF. Malformed lines are skipped.
async fn read_stdin(tx: mpsc::Sender<Value>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(record) => {
                        if tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping malformed log line: {e}"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from stdin: {e}");
                break;
            }
        }
    }
}
