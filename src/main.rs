// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused,
    unused_lifetimes,
    unused_qualifications,
    unused_results,
    anonymous_parameters,
    deprecated_in_future,
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::unseparated_literal_suffix,
    clippy::decimal_literal_representation,
    clippy::single_char_lifetime_names,
    clippy::pattern_type_mismatch,
    clippy::fallible_impl_from,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::wildcard_enum_match_arm,
    clippy::deref_by_slicing,
    clippy::default_numeric_fallback,
    clippy::shadow_reuse,
    clippy::clone_on_ref_ptr,
    clippy::todo,
    clippy::string_add,
    clippy::future_not_send,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![cfg_attr(not(test), warn(clippy::panic_in_result_fn))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod alert;
mod api;
mod bus;
mod event;
mod monitor;
mod object;
mod poll;
mod power;
mod registry;
mod rfkill;
mod storage;
#[cfg(test)]
mod testing;
mod threshold;

use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use tokio::{signal::unix, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    alert::desktop::DesktopNotifications,
    bus::{dbus::DbusTransport, TransportError},
    event::EventReceiver,
    monitor::Monitor,
    power::PowerMonitor,
    rfkill::RfkillMonitor,
    storage::StorageMonitor,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Log more; repeat for even more
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    const fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn init_logging(level: LevelFilter) {
    if systemd_journal_logger::connected_to_journal() && systemd_journal_logger::init().is_ok() {
        log::set_max_level(level);
        return;
    }
    let logger_env = env_logger::Env::new()
        .filter_or("NEBEL_LOG", level.to_string())
        .write_style("NEBEL_LOG_STYLE");
    env_logger::Builder::from_env(logger_env).init();
}

/// Runs a monitor that started, or explains why there is nothing to run.
fn spawn<M: Monitor + 'static>(
    service: &str,
    started: Result<M, TransportError>,
    events: EventReceiver,
    cancel: &CancellationToken,
) -> Option<JoinHandle<()>> {
    match started {
        Ok(monitor) => Some(tokio::spawn(monitor::run(
            monitor,
            events,
            cancel.child_token(),
        ))),
        Err(e) => {
            warn!(
                "Not watching {}: {:#}",
                service,
                anyhow::Error::new(e)
            );
            None
        }
    }
}

async fn terminated() -> Result<()> {
    let mut terminate = unix::signal(unix::SignalKind::terminate())
        .context("Unable to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Unable to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

async fn run() -> Result<()> {
    let system_conn = Connection::system()
        .await
        .context("Unable to connect to system bus")?;
    let session_conn = Connection::session()
        .await
        .context("Unable to connect to user session bus")?;
    let notifications = DesktopNotifications::new(&session_conn)
        .await
        .context("Unable to connect to the notification service on the session bus")?;

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let (tx, rx) = event::channel();
    let storage = StorageMonitor::new(
        DbusTransport::new(system_conn.clone(), tx),
        notifications.clone(),
    )
    .await;
    tasks.extend(spawn("UDisks2", storage, rx, &cancel));

    let (tx, rx) = event::channel();
    let power = PowerMonitor::new(
        DbusTransport::new(system_conn.clone(), tx.clone()),
        notifications.clone(),
        tx,
    )
    .await;
    tasks.extend(spawn("UPower", power, rx, &cancel));

    let (tx, rx) = event::channel();
    let rfkill = RfkillMonitor::new(DbusTransport::new(system_conn, tx), notifications).await;
    tasks.extend(spawn("URfkill", rfkill, rx, &cancel));

    if tasks.is_empty() {
        bail!("None of the watched services are available");
    }

    terminated().await?;
    info!("Shutting down");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Monitor task failed: {}", e);
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_level());

    if let Err(e) = run().await {
        error!("We encountered an error: {:#}", e);
        process::exit(1);
    }
}
