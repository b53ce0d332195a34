//! Explicit application context threaded through the acceptor, render
//! workers, slave workers, and the stats writer — replacing the
//! original's file-scope globals (`render_request_queue`, `config`,
//! spec §9 design notes).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::net::ConnectionTable;
use crate::queue::RequestQueue;
use crate::style::StyleContext;

/// Shared, read-mostly application state. Cloned cheaply (an `Arc`) into
/// every worker thread.
pub struct AppContext {
    pub config: Config,
    pub queue: Arc<RequestQueue>,
    pub styles: HashMap<String, Arc<StyleContext>>,
    pub connections: ConnectionTable,
    exiting: AtomicBool,
}

impl AppContext {
    pub fn new(config: Config, styles: HashMap<String, Arc<StyleContext>>) -> Arc<Self> {
        let max_zoom = styles
            .values()
            .map(|s| s.config.maxzoom)
            .max()
            .unwrap_or(20)
            .max(20) as usize;

        Arc::new(AppContext {
            config,
            queue: Arc::new(RequestQueue::new(max_zoom)),
            styles,
            connections: ConnectionTable::new(),
            exiting: AtomicBool::new(false),
        })
    }

    pub fn style(&self, name: &str) -> Option<Arc<StyleContext>> {
        self.styles.get(name).cloned()
    }

    /// Set by a worker on an unrecoverable storage failure, or by the
    /// signal-handling thread; observed by the acceptor's poll loop and
    /// by every worker's pop loop so the whole process can wind down
    /// (spec §4.G: "signal process exit via the acceptor's exit-pipe").
    /// Also broadcasts the queue's condition variable, so a worker or
    /// slave thread blocked waiting for a request wakes up and exits
    /// rather than hanging forever with nothing left to pop.
    pub fn request_exit(&self) {
        self.exiting.store(true, Ordering::SeqCst);
        self.queue.shutdown();
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MapnikConfig};
    use std::collections::BTreeMap;

    #[test]
    fn request_exit_is_observed() {
        let config = Config {
            mapnik: MapnikConfig::default(),
            renderd: BTreeMap::new(),
            styles: BTreeMap::new(),
        };
        let ctx = AppContext::new(config, HashMap::new());
        assert!(!ctx.is_exiting());
        ctx.request_exit();
        assert!(ctx.is_exiting());
    }
}
