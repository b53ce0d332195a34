mod args;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info, Level};

use renderd::config::Config;
use renderd::context::AppContext;
use renderd::net;
use renderd::render::{worker, Rasterizer, UnimplementedRasterizer};
use renderd::slave;
use renderd::stats;
use renderd::style::StyleContext;

use crate::args::Args;

/// Web Mercator, the SRS every Mapnik style in practice uses. A real
/// deployment reads this out of the style's XML via Mapnik's own API
/// (out of scope here, spec §1); this binary doesn't parse Mapnik XML at
/// all, so it can only ever bind styles against this one projection.
const DEFAULT_SRS: &str = "+proj=merc +a=6378137 +b=6378137";

fn main() -> ExitCode {
    let args = Args::parse();

    if args.foreground {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let config = match Config::load_from_file(&args.config.to_string_lossy()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    let active = match config.active_renderd(args.slave) {
        Ok(section) => section.clone(),
        Err(e) => {
            error!(error = %e, "no active renderd section");
            return ExitCode::from(1);
        }
    };

    let mut styles = HashMap::new();
    for (name, style_config) in &config.styles {
        let style_ctx = StyleContext::load(style_config.clone(), DEFAULT_SRS, &active.tile_dir);
        if !style_ctx.is_ok() {
            error!(style = %name, "style failed to load");
            return ExitCode::from(1);
        }
        styles.insert(name.clone(), Arc::new(style_ctx));
    }

    let ctx = AppContext::new(config.clone(), styles);

    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGHUP]) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return ExitCode::from(6);
        }
    };
    {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "received signal, shutting down");
                ctx.request_exit();
            }
        });
    }

    let rasterizer: Arc<dyn Rasterizer> = Arc::new(UnimplementedRasterizer);
    rasterizer.prepare(active.num_threads as usize);

    let mut handles = Vec::new();
    for _ in 0..active.num_threads {
        let ctx = Arc::clone(&ctx);
        let rasterizer = Arc::clone(&rasterizer);
        let handle = match thread::Builder::new()
            .name("render-worker".to_string())
            .spawn(move || worker::run(ctx, rasterizer))
        {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "failed to spawn render worker thread");
                return ExitCode::from(7);
            }
        };
        handles.push(handle);
    }

    for (&slave_id, section) in &config.renderd {
        if slave_id == args.slave {
            continue;
        }
        handles.extend(slave::spawn(Arc::clone(&ctx), section.clone()));
    }

    {
        let ctx = Arc::clone(&ctx);
        let stats_file = active.stats_file.clone();
        handles.push(thread::spawn(move || stats::run(ctx, &stats_file)));
    }

    if let Err(e) = net::run(Arc::clone(&ctx), &active) {
        error!(error = %e, "acceptor failed");
        return ExitCode::from(3);
    }

    for handle in handles {
        let _ = handle.join();
    }

    ExitCode::SUCCESS
}
