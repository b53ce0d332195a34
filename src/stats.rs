//! Periodic stats file writer (spec §4.H), mirroring
//! `stats_writeout_thread`: every ten seconds, snapshot the queue's
//! counters and lengths, write them to `<stats_file>.tmp`, then rename
//! over the real path so readers never see a partial file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::context::AppContext;

const WRITE_INTERVAL: Duration = Duration::from_secs(10);
const MAX_FAILED_ATTEMPTS: u32 = 3;

/// Runs the stats writer loop until `ctx.is_exiting()` or three
/// consecutive write failures, matching the original's give-up threshold.
pub fn run(ctx: Arc<AppContext>, stats_file: &str) {
    let tmp_path = format!("{stats_file}.tmp");
    let mut failed_attempts = 0u32;

    while !ctx.is_exiting() {
        match write_once(&ctx, &tmp_path, stats_file) {
            Ok(()) => failed_attempts = 0,
            Err(e) => {
                failed_attempts += 1;
                tracing::warn!(error = %e, attempt = failed_attempts, "failed to write stats file");
                if failed_attempts > MAX_FAILED_ATTEMPTS {
                    tracing::error!("failed repeatedly to write stats, giving up");
                    break;
                }
            }
        }
        thread::sleep(WRITE_INTERVAL);
    }
}

fn write_once(ctx: &AppContext, tmp_path: &str, stats_file: &str) -> io::Result<()> {
    let lengths = ctx.queue.lengths();
    let stats = ctx.queue.stats();

    let mut out = File::create(tmp_path)?;
    writeln!(out, "ReqQueueLength: {}", lengths.req)?;
    writeln!(out, "ReqPrioQueueLength: {}", lengths.req_prio)?;
    writeln!(out, "ReqLowQueueLength: {}", lengths.req_low)?;
    writeln!(out, "ReqBulkQueueLength: {}", lengths.req_bulk)?;
    writeln!(out, "DirtQueueLength: {}", lengths.dirty)?;
    writeln!(out, "DropedRequest: {}", stats.no_req_dropped)?;
    writeln!(out, "ReqRendered: {}", stats.no_req_render)?;
    writeln!(out, "TimeRendered: {}", stats.time_req_render)?;
    writeln!(out, "ReqPrioRendered: {}", stats.no_req_prio_render)?;
    writeln!(out, "TimePrioRendered: {}", stats.time_req_prio_render)?;
    writeln!(out, "ReqLowRendered: {}", stats.no_req_low_render)?;
    writeln!(out, "TimeLowRendered: {}", stats.time_req_low_render)?;
    writeln!(out, "ReqBulkRendered: {}", stats.no_req_bulk_render)?;
    writeln!(out, "TimeBulkRendered: {}", stats.time_req_bulk_render)?;
    writeln!(out, "DirtyRendered: {}", stats.no_dirty_render)?;
    writeln!(out, "TimeDirtyRendered: {}", stats.time_req_dirty)?;

    for (zoom, count) in stats.no_zoom_render.iter().enumerate() {
        writeln!(out, "ZoomRendered{zoom:02}: {count}")?;
    }
    for (zoom, ms) in stats.time_zoom_render.iter().enumerate() {
        writeln!(out, "TimeRenderedZoom{zoom:02}: {ms}")?;
    }

    out.sync_all()?;
    fs::rename(tmp_path, stats_file)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MapnikConfig};
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn write_once_produces_a_readable_stats_file() {
        let dir = tempfile::tempdir().unwrap();
        let stats_file = dir.path().join("renderd.stats");

        let config = Config {
            mapnik: MapnikConfig::default(),
            renderd: BTreeMap::new(),
            styles: BTreeMap::new(),
        };
        let ctx = AppContext::new(config, HashMap::new());

        write_once(
            &ctx,
            &format!("{}.tmp", stats_file.display()),
            stats_file.to_str().unwrap(),
        )
        .unwrap();

        let contents = fs::read_to_string(&stats_file).unwrap();
        assert!(contents.contains("ReqQueueLength: 0"));
        assert!(contents.contains("ZoomRendered00: 0"));
    }
}
