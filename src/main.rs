//! UsbSleuth — USB device and removable-volume inspector.
//!
//! Thin binary entry point and composition root. All logic lives in the
//! `usbsleuth-core` and `usbsleuth-state` crates; this file picks the
//! platform adapter, wires the directories together and renders snapshots
//! to the terminal.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use usbsleuth_core::device::{UsbDeviceDirectory, UsbStorageDirectory};
use usbsleuth_core::model::size::format_optional;
use usbsleuth_core::model::{DeviceEntry, DeviceId};
use usbsleuth_core::platform::memory::{MemoryBackend, MemoryVolumeEvents};
use usbsleuth_core::platform::{self, DeviceBackend, VolumeEventSource};
use usbsleuth_core::watcher::DeviceChangeWatcher;
use usbsleuth_state::{MainAreaState, MainAreaStateManager, Operation, SnapshotCause};

/// Upper bound for one refresh or eject to commit.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Polling interval of the `watch` loop.
const TICK: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "usbsleuth", version, about = "Inspect and safely eject USB storage devices")]
struct Cli {
    /// Use built-in demo devices instead of querying the OS.
    #[arg(long, global = true)]
    demo: bool,

    /// Log at DEBUG instead of INFO.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List USB devices and the volumes of storage devices.
    List {
        /// Print the device listing as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the device listing every time a volume arrives or is removed.
    Watch {
        /// Stop after this many seconds (runs until interrupted otherwise).
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Request safe removal of a storage device.
    Eject {
        /// Instance id as shown by `list`.
        instance_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialise structured logging.
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("UsbSleuth starting{}", if cli.demo { " (demo)" } else { "" });

    let (backend, events) = platform_for(cli.demo);
    let mut manager = build_manager(backend);

    match cli.command {
        Command::List { json } => {
            let state = refresh_blocking(&mut manager)?;
            if json {
                let text = serde_json::to_string_pretty(&state.devices)
                    .context("failed to serialise device listing")?;
                println!("{text}");
            } else {
                print_devices(&state);
            }
        }
        Command::Watch { seconds } => watch(&mut manager, events, seconds)?,
        Command::Eject { instance_id } => eject(&mut manager, &DeviceId::new(instance_id))?,
    }

    Ok(())
}

// ── Composition ─────────────────────────────────────────────────────────────

fn platform_for(demo: bool) -> (Arc<dyn DeviceBackend>, Arc<dyn VolumeEventSource>) {
    if demo {
        (
            Arc::new(MemoryBackend::demo()),
            Arc::new(MemoryVolumeEvents::new()),
        )
    } else {
        (platform::system_backend(), platform::system_volume_events())
    }
}

fn build_manager(backend: Arc<dyn DeviceBackend>) -> MainAreaStateManager {
    let base = Arc::new(UsbDeviceDirectory::new(Arc::clone(&backend)));
    let storage = Arc::new(UsbStorageDirectory::new(Arc::clone(&base), backend));
    MainAreaStateManager::new(base, storage)
}

// ── Commands ────────────────────────────────────────────────────────────────

fn refresh_blocking(manager: &mut MainAreaStateManager) -> anyhow::Result<Arc<MainAreaState>> {
    manager.refresh();
    if !manager.wait_idle(OPERATION_TIMEOUT) {
        bail!("device scan did not finish within {OPERATION_TIMEOUT:?}");
    }
    let state = manager.state();
    if let Some(e) = &state.refresh_error {
        return Err(e.clone()).context("device scan failed");
    }
    Ok(state)
}

fn watch(
    manager: &mut MainAreaStateManager,
    events: Arc<dyn VolumeEventSource>,
    seconds: Option<u64>,
) -> anyhow::Result<()> {
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let snapshots = manager.subscribe();

    let mut watcher = DeviceChangeWatcher::new(events);
    let changes = watcher.subscribe();
    watcher.start().context("failed to start device watcher")?;

    manager.refresh();
    while deadline.map_or(true, |d| Instant::now() < d) {
        if let Ok(change) = changes.recv_timeout(TICK) {
            tracing::info!("Volume change at {}", change.observed_at.format("%H:%M:%S"));
            // Several notifications for one plug-in collapse into one scan.
            while changes.try_recv().is_ok() {}
            manager.refresh();
        }

        manager.process_messages();
        for state in snapshots.try_iter() {
            if state.cause != SnapshotCause::RefreshCompleted {
                continue;
            }
            match &state.refresh_error {
                Some(e) => tracing::warn!("Scan failed: {}", e),
                None => print_devices(&state),
            }
        }
    }

    watcher.stop();
    Ok(())
}

fn eject(manager: &mut MainAreaStateManager, id: &DeviceId) -> anyhow::Result<()> {
    refresh_blocking(manager)?;

    manager.eject_storage_device(id);
    if !manager.wait_idle(OPERATION_TIMEOUT) {
        bail!("eject of {id} did not finish within {OPERATION_TIMEOUT:?}");
    }

    let state = manager.state();
    if state.last_operation == Some(Operation::Eject) {
        if let Some(e) = &state.last_operation_error {
            return Err(e.clone()).with_context(|| format!("could not eject {id}"));
        }
    }
    match &state.last_eject_result {
        Some(result) if result.success => {
            println!("{id} can now be safely removed");
            Ok(())
        }
        Some(result) => bail!(
            "eject of {} was refused (CONFIGRET {})",
            result.attempted_instance_id,
            result.config_ret
        ),
        None => bail!("eject of {id} produced no result"),
    }
}

// ── Rendering ───────────────────────────────────────────────────────────────

fn print_devices(state: &MainAreaState) {
    println!(
        "{} USB devices ({} storage)",
        state.device_count,
        state.storages.len()
    );
    for entry in &state.devices {
        let base = entry.base();
        let ids = match (&base.vendor_id, &base.product_id) {
            (Some(vid), Some(pid)) => format!("{vid}:{pid}"),
            _ => "----:----".to_string(),
        };
        let marker = if entry.is_storage() { "*" } else { " " };
        println!("{marker} {ids}  {}", base.display_name());
        println!("      {}", base.id);

        if let DeviceEntry::Storage(storage) = entry {
            if storage.volumes.is_empty() {
                println!("      (no mounted volumes)");
            }
            for volume in &storage.volumes {
                println!(
                    "      {:<4} {:<6} {:<12} {} free of {}",
                    volume
                        .mount_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".into()),
                    volume.file_system.as_deref().unwrap_or("-"),
                    volume.volume_label.as_deref().unwrap_or(""),
                    format_optional(volume.free_bytes),
                    format_optional(volume.total_bytes),
                );
            }
        }
    }
}
