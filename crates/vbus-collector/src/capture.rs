//! Raw capture sessions: periodic dumps of the bus to files

use std::path::Path;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use vbus_protocol::{TransportConfig, VBusConnection};

/// Manifest written next to the capture files
#[derive(Debug, Serialize)]
struct Manifest {
    created: String,
    samples: Vec<CaptureSample>,
}

#[derive(Debug, Serialize)]
struct CaptureSample {
    file: String,
    timestamp: String,
    size: usize,
}

/// Capture raw bus data every `interval` seconds for `duration` seconds,
/// writing one `capture-<timestamp>.bin` per sample plus a manifest.
///
/// Blocking; run from a blocking task when on an async runtime.
pub fn run_capture_session(
    transport: &TransportConfig,
    duration: u64,
    interval: u64,
    window: u64,
    outdir: &Path,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(outdir)?;

    let mut conn = VBusConnection::open(transport)?;
    let count = std::cmp::max(1, duration / interval.max(1));
    let mut samples = Vec::with_capacity(count as usize);

    for i in 0..count {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        tracing::info!("capturing sample {}/{count} at {timestamp}", i + 1);

        if let Err(e) = conn.request_data() {
            tracing::warn!("data request failed: {e}");
        }
        let raw = conn.read_window(Duration::from_secs(window))?;

        // ':' is unsafe in filenames on some systems
        let file = format!("capture-{}.bin", timestamp.replace(':', "-"));
        std::fs::write(outdir.join(&file), &raw)?;
        tracing::info!(%file, bytes = raw.len(), "capture written");

        samples.push(CaptureSample {
            file,
            timestamp,
            size: raw.len(),
        });

        if i < count - 1 {
            std::thread::sleep(Duration::from_secs(interval));
        }
    }

    let manifest = Manifest {
        created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        samples,
    };
    let manifest_path = outdir.join("manifest.json");
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
    tracing::info!(
        captures = manifest.samples.len(),
        manifest = %manifest_path.display(),
        "capture session finished"
    );

    Ok(())
}
