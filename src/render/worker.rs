//! Render worker main loop (spec §4.G).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::AppContext;
use crate::metatile::MetaTile;
use crate::queue::{Item, ItemId};
use crate::render::htcp;
use crate::render::rasterizer::Rasterizer;
use crate::wire::{Command, Response};

/// Cooldown applied after a rasterization failure, to protect the
/// backing datastore/filesystem from a storm of retries against a
/// persistently broken style or input (spec §4.G).
const RASTER_FAILURE_COOLDOWN: Duration = Duration::from_secs(10);

/// Runs one render worker's pop/render/respond loop until the context is
/// marked exiting. Intended to be the body of a dedicated OS thread.
pub fn run(ctx: Arc<AppContext>, rasterizer: Arc<dyn Rasterizer>) {
    while !ctx.is_exiting() {
        let Some(popped) = ctx.queue.fetch_request() else {
            break;
        };
        let start = Instant::now();

        let outcome = process_item(&ctx, &rasterizer, &popped.item);

        match outcome {
            Outcome::Completed => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                respond(&ctx, popped.id, popped.item, Command::Done, Some(elapsed_ms));
            }
            Outcome::OutOfBounds => {
                respond(&ctx, popped.id, popped.item, Command::Ignore, None);
            }
            Outcome::Rejected => {
                respond(&ctx, popped.id, popped.item, Command::NotDone, None);
            }
            Outcome::RasterFailed => {
                respond(&ctx, popped.id, popped.item, Command::NotDone, None);
                std::thread::sleep(RASTER_FAILURE_COOLDOWN);
            }
            Outcome::StorageFailed => {
                respond(&ctx, popped.id, popped.item, Command::NotDone, None);
                tracing::error!("storage write failed; requesting daemon exit");
                ctx.request_exit();
            }
        }
    }
}

enum Outcome {
    Completed,
    OutOfBounds,
    Rejected,
    RasterFailed,
    StorageFailed,
}

fn process_item(ctx: &AppContext, rasterizer: &Arc<dyn Rasterizer>, item: &Item) -> Outcome {
    let style = match ctx.style(&item.style_name) {
        Some(s) if s.is_ok() => s,
        Some(_) => {
            tracing::error!(style = %item.style_name, "style failed to load, cannot render");
            return Outcome::Rejected;
        }
        None => {
            tracing::error!(style = %item.style_name, "unknown style");
            return Outcome::Rejected;
        }
    };

    if !style.in_bounds(item.mx, item.my, item.z) {
        tracing::info!(mx = item.mx, my = item.my, z = item.z, "got bad co-ords");
        return Outcome::OutOfBounds;
    }

    let bbox = style.projection.metatile_bbox(item.mx, item.my, item.z);

    let tiles = match rasterizer.render_metatile(
        &style.config,
        bbox,
        bbox.render_size_x,
        bbox.render_size_y,
    ) {
        Ok(tiles) => tiles,
        Err(e) => {
            tracing::error!(error = %e, "rasterization failed");
            return Outcome::RasterFailed;
        }
    };

    let mut meta = MetaTile::new(item.mx, item.my, item.z);
    for ox in 0..bbox.render_size_x {
        for oy in 0..bbox.render_size_y {
            let idx = (ox * bbox.render_size_y + oy) as usize;
            if let Some(bytes) = tiles.get(idx) {
                meta.set(item.mx + ox, item.my + oy, bytes.clone());
            }
        }
    }

    let encoded = meta.encode();
    if let Err(e) =
        style
            .store
            .write_metatile(&item.style_name, &item.options, item.mx, item.my, item.z, &encoded)
    {
        tracing::error!(error = %e, "failed to write metatile");
        return Outcome::StorageFailed;
    }

    if let Some(sock) = style.htcp_socket() {
        htcp::purge_metatile(
            sock,
            &style.config.host,
            &style.config.uri,
            &style.config.ext,
            item.mx,
            item.my,
            item.z,
            bbox.render_size_x,
            bbox.render_size_y,
        );
    }

    Outcome::Completed
}

/// Sends the response to every descriptor that asked for `(style, mx, my,
/// z)` - the primary item plus its whole duplicate chain - then removes
/// the item from the queue. Removal happens first, under the queue lock,
/// before any reply is written (Open Question 1). Each descriptor gets
/// back its own original `x`/`y`, not the shared metatile origin (spec
/// §3 invariant 6), and `Dirty` waiters never hear back at all.
fn respond(ctx: &AppContext, id: ItemId, item: Item, cmd: Command, render_time_ms: Option<u64>) {
    let removed = ctx.queue.remove_request(id, render_time_ms);
    debug_assert_eq!(removed.mx, item.mx);

    if let Some(fd) = removed.client_fd.filter(|_| removed.cmd.is_render_request()) {
        let resp = Response {
            wire_ver: removed.wire_ver,
            cmd,
            x: removed.x,
            y: removed.y,
            z: removed.z,
            style_name: removed.style_name.clone(),
            mime_type: removed.mime_type.clone(),
            options: removed.options.clone(),
        };
        ctx.connections.send(fd, &resp);
    }

    for dup in &removed.duplicates {
        if !dup.cmd.is_render_request() {
            continue;
        }
        if let Some(fd) = dup.client_fd {
            let resp = Response {
                wire_ver: dup.wire_ver,
                cmd,
                x: dup.x,
                y: dup.y,
                z: removed.z,
                style_name: removed.style_name.clone(),
                mime_type: dup.mime_type.clone(),
                options: dup.options.clone(),
            };
            ctx.connections.send(fd, &resp);
        }
    }
}
