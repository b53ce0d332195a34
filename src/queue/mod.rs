//! Five-priority deduplicating request queue (spec §4.E).
//!
//! Items live in a small arena (`Vec<Option<Item>>` with a free list);
//! each priority list is a `VecDeque<ItemId>` instead of an intrusive
//! linked list with sentinel nodes, and the pending-set is a `HashMap`
//! from [`Fingerprint`] to `ItemId`. A `Mutex` + `Condvar` pair stands in
//! for the original's `qLock`/`qCond`.

mod item;

pub use item::{DuplicateWaiter, Fingerprint, Item, ItemId, QueueTag};

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};

use crate::metatile::METATILE;
use crate::wire::{Command, Request};

/// Prime bucket count the original hash index used; kept only so
/// [`Fingerprint::legacy_bucket`] callers can log a comparable value.
pub const HASHIDX_SIZE: u64 = 2213;

/// Max items any single `Request`/`RequestPrio`/`RequestLow`/`RequestBulk`
/// list holds before new arrivals overflow to `Dirty`.
pub const REQ_LIMIT: usize = 32;
/// Max items the `Dirty` overflow list holds before new arrivals are
/// rejected outright.
pub const DIRTY_LIMIT: usize = 1000;

/// Snapshot of the counters the stats writer (spec §4.H) persists.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub no_dirty_render: u64,
    pub no_req_render: u64,
    pub no_req_prio_render: u64,
    pub no_req_low_render: u64,
    pub no_req_bulk_render: u64,
    pub no_req_dropped: u64,
    pub no_zoom_render: Vec<u64>,
    pub time_req_render: u64,
    pub time_req_prio_render: u64,
    pub time_req_low_render: u64,
    pub time_req_bulk_render: u64,
    pub time_req_dirty: u64,
    pub time_zoom_render: Vec<u64>,
}

impl Stats {
    fn new(max_zoom: usize) -> Self {
        Stats {
            no_zoom_render: vec![0; max_zoom + 1],
            time_zoom_render: vec![0; max_zoom + 1],
            ..Default::default()
        }
    }
}

/// Snapshot of the five list lengths, used by `no_requests_queued` and the
/// stats writer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct QueueLengths {
    pub req: usize,
    pub req_prio: usize,
    pub req_low: usize,
    pub req_bulk: usize,
    pub dirty: usize,
}

struct Arena {
    slots: Vec<Option<Item>>,
    free: Vec<usize>,
}

impl Arena {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, item: Item) -> ItemId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(item);
            ItemId(idx)
        } else {
            self.slots.push(Some(item));
            ItemId(self.slots.len() - 1)
        }
    }

    fn get(&self, id: ItemId) -> &Item {
        self.slots[id.0].as_ref().expect("dangling ItemId")
    }

    fn get_mut(&mut self, id: ItemId) -> &mut Item {
        self.slots[id.0].as_mut().expect("dangling ItemId")
    }

    fn remove(&mut self, id: ItemId) -> Item {
        let item = self.slots[id.0].take().expect("dangling ItemId");
        self.free.push(id.0);
        item
    }
}

struct Inner {
    arena: Arena,
    req: VecDeque<ItemId>,
    req_prio: VecDeque<ItemId>,
    req_low: VecDeque<ItemId>,
    req_bulk: VecDeque<ItemId>,
    dirty: VecDeque<ItemId>,
    render: Vec<ItemId>,
    pending: HashMap<Fingerprint, ItemId>,
    stats: Stats,
    shutting_down: bool,
}

impl Inner {
    fn list_mut(&mut self, tag: QueueTag) -> &mut VecDeque<ItemId> {
        match tag {
            QueueTag::Request => &mut self.req,
            QueueTag::RequestPrio => &mut self.req_prio,
            QueueTag::RequestLow => &mut self.req_low,
            QueueTag::RequestBulk => &mut self.req_bulk,
            QueueTag::Dirty => &mut self.dirty,
            QueueTag::Render => unreachable!("render is a Vec, not a VecDeque"),
        }
    }

    fn lengths(&self) -> QueueLengths {
        QueueLengths {
            req: self.req.len(),
            req_prio: self.req_prio.len(),
            req_low: self.req_low.len(),
            dirty: self.dirty.len(),
            req_bulk: self.req_bulk.len(),
        }
    }
}

/// Outcome of popping the queue: the item plus its id, needed later by
/// `remove_request`.
pub struct Popped {
    pub id: ItemId,
    pub item: Item,
}

pub struct RequestQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    max_zoom: usize,
}

fn metatile_origin(x: i32, y: i32) -> (i32, i32) {
    let mask = !((METATILE as i32) - 1);
    (x & mask, y & mask)
}

impl RequestQueue {
    pub fn new(max_zoom: usize) -> Self {
        RequestQueue {
            inner: Mutex::new(Inner {
                arena: Arena::new(),
                req: VecDeque::new(),
                req_prio: VecDeque::new(),
                req_low: VecDeque::new(),
                req_bulk: VecDeque::new(),
                dirty: VecDeque::new(),
                render: Vec::new(),
                pending: HashMap::new(),
                stats: Stats::new(max_zoom),
                shutting_down: false,
            }),
            cond: Condvar::new(),
            max_zoom,
        }
    }

    /// Adds a render request on behalf of `client_fd` (`None` for a
    /// fire-and-forget `Dirty` submission or once the client is already
    /// gone). Returns the command to reply with: `Ignore` if the caller
    /// should wait for an eventual `Done`, `NotDone` if no further
    /// notification will come.
    pub fn add_request(&self, req: &Request, client_fd: Option<i32>) -> Command {
        let (mx, my) = metatile_origin(req.x, req.y);
        let fp = Fingerprint::new(&req.style_name, mx, my, req.z);

        let mut inner = self.inner.lock().unwrap();

        if let Some(&existing) = inner.pending.get(&fp) {
            let tag = inner.arena.get(existing).current_tag;
            return match tag {
                QueueTag::Render
                | QueueTag::Request
                | QueueTag::RequestPrio
                | QueueTag::RequestLow => {
                    let is_dirty = req.cmd == Command::Dirty;
                    let waiter = DuplicateWaiter {
                        client_fd: if is_dirty { None } else { client_fd },
                        cmd: req.cmd,
                        wire_ver: req.wire_ver,
                        x: req.x,
                        y: req.y,
                        mime_type: req.mime_type.clone(),
                        options: req.options.clone(),
                    };
                    inner.arena.get_mut(existing).duplicates.push(waiter);
                    if is_dirty {
                        Command::NotDone
                    } else {
                        Command::Ignore
                    }
                }
                QueueTag::Dirty | QueueTag::RequestBulk => Command::NotDone,
            };
        }

        let tag = match req.cmd {
            Command::Render if inner.req.len() < REQ_LIMIT => QueueTag::Request,
            Command::RenderPrio if inner.req_prio.len() < REQ_LIMIT => QueueTag::RequestPrio,
            Command::RenderLow if inner.req_low.len() < REQ_LIMIT => QueueTag::RequestLow,
            Command::RenderBulk if inner.req_bulk.len() < REQ_LIMIT => QueueTag::RequestBulk,
            _ if inner.dirty.len() < DIRTY_LIMIT => QueueTag::Dirty,
            _ => {
                inner.stats.no_req_dropped += 1;
                return Command::NotDone;
            }
        };

        let is_dirty = tag == QueueTag::Dirty;
        let item = Item {
            style_name: req.style_name.clone(),
            options: req.options.clone(),
            mime_type: req.mime_type.clone(),
            x: req.x,
            y: req.y,
            mx,
            my,
            z: req.z,
            cmd: req.cmd,
            wire_ver: req.wire_ver,
            client_fd: if is_dirty { None } else { client_fd },
            current_tag: tag,
            origin_tag: tag,
            duplicates: Vec::new(),
        };

        let id = inner.arena.insert(item);
        inner.pending.insert(fp, id);
        inner.list_mut(tag).push_back(id);

        self.cond.notify_one();

        if is_dirty {
            Command::NotDone
        } else {
            Command::Ignore
        }
    }

    /// Pops the next item in strict priority order `RequestPrio > Request
    /// > RequestLow > Dirty > RequestBulk`, moving it to the `Render`
    /// list. Blocks on the condition variable while every list is empty,
    /// until woken by `add_request` or by [`RequestQueue::shutdown`], at
    /// which point it returns `None` once the backlog has drained.
    pub fn fetch_request(&self) -> Option<Popped> {
        let mut inner = self.inner.lock().unwrap();

        loop {
            let next = if let Some(id) = inner.req_prio.pop_front() {
                inner.stats.no_req_prio_render += 1;
                Some(id)
            } else if let Some(id) = inner.req.pop_front() {
                inner.stats.no_req_render += 1;
                Some(id)
            } else if let Some(id) = inner.req_low.pop_front() {
                inner.stats.no_req_low_render += 1;
                Some(id)
            } else if let Some(id) = inner.dirty.pop_front() {
                inner.stats.no_dirty_render += 1;
                Some(id)
            } else if let Some(id) = inner.req_bulk.pop_front() {
                inner.stats.no_req_bulk_render += 1;
                Some(id)
            } else {
                None
            };

            if let Some(id) = next {
                inner.arena.get_mut(id).current_tag = QueueTag::Render;
                inner.render.push(id);
                let item = inner.arena.get(id).clone();
                return Some(Popped { id, item });
            }

            if inner.shutting_down {
                return None;
            }

            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Wakes every thread blocked in `fetch_request` so they can notice
    /// the process is exiting, instead of waiting on a request that will
    /// never arrive (spec: "woken by `add_request` signal or by shutdown
    /// signal broadcast").
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutting_down = true;
        self.cond.notify_all();
    }

    /// Invalidates descriptor `fd` on every item in `Request`,
    /// `RequestPrio`, `RequestBulk` and `Render` (and their duplicate
    /// chains), matching the original's `clear_by_fd` list coverage.
    /// `RequestLow` and `Dirty` are deliberately skipped: `Dirty` items
    /// already carry no descriptor, and the source's own walk omits
    /// `RequestLow` too.
    pub fn clear_by_fd(&self, fd: i32) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<ItemId> = inner
            .req
            .iter()
            .chain(inner.req_prio.iter())
            .chain(inner.req_bulk.iter())
            .chain(inner.render.iter())
            .copied()
            .collect();
        for id in ids {
            inner.arena.get_mut(id).clear_fd(fd);
        }
    }

    /// Removes a rendered item from the `Render` list and the pending
    /// index, crediting `render_time_ms` to its origin queue's and zoom's
    /// running totals. Must be called under the lock before any reply is
    /// written to a duplicate chain (Open Question 1: the original source
    /// unlinks outside the lock in at least one path; this reimplementation
    /// never does).
    pub fn remove_request(&self, id: ItemId, render_time_ms: Option<u64>) -> Item {
        let mut inner = self.inner.lock().unwrap();

        inner.render.retain(|&r| r != id);

        let item = inner.arena.get(id).clone();
        let fp = Fingerprint::new(&item.style_name, item.mx, item.my, item.z);
        inner.pending.remove(&fp);

        if let Some(ms) = render_time_ms {
            match item.origin_tag {
                QueueTag::RequestPrio => inner.stats.time_req_prio_render += ms,
                QueueTag::Request => inner.stats.time_req_render += ms,
                QueueTag::RequestLow => inner.stats.time_req_low_render += ms,
                QueueTag::Dirty => inner.stats.time_req_dirty += ms,
                QueueTag::RequestBulk => inner.stats.time_req_bulk_render += ms,
                QueueTag::Render => {}
            }
            let z = item.z as usize;
            if z <= self.max_zoom {
                inner.stats.no_zoom_render[z] += 1;
                inner.stats.time_zoom_render[z] += ms;
            }
        }

        inner.arena.remove(id)
    }

    pub fn no_requests_queued(&self, cmd: Command) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        match cmd {
            Command::RenderPrio => Some(inner.req_prio.len()),
            Command::Render => Some(inner.req.len()),
            Command::RenderLow => Some(inner.req_low.len()),
            Command::Dirty => Some(inner.dirty.len()),
            Command::RenderBulk => Some(inner.req_bulk.len()),
            _ => None,
        }
    }

    pub fn lengths(&self) -> QueueLengths {
        self.inner.lock().unwrap().lengths()
    }

    pub fn stats(&self) -> Stats {
        self.inner.lock().unwrap().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_request(style: &str, x: i32, y: i32, z: i32, cmd: Command) -> Request {
        Request {
            wire_ver: 3,
            cmd,
            x,
            y,
            z,
            style_name: style.to_string(),
            mime_type: "image/png".to_string(),
            options: String::new(),
        }
    }

    #[test]
    fn single_request_populates_list_and_index() {
        let q = RequestQueue::new(20);
        let req = render_request("default", 1, 1, 1, Command::Render);
        let resp = q.add_request(&req, Some(5));
        assert_eq!(resp, Command::Ignore);
        assert_eq!(q.lengths().req, 1);

        let popped = q.fetch_request().unwrap();
        assert_eq!(popped.item.mx, 0);
        assert_eq!(popped.item.my, 0);
    }

    #[test]
    fn duplicate_requests_join_the_chain_and_get_ignore() {
        let q = RequestQueue::new(20);
        let req = render_request("default", 1, 1, 1, Command::Render);
        assert_eq!(q.add_request(&req, Some(1)), Command::Ignore);
        for i in 0..4 {
            assert_eq!(q.add_request(&req, Some(2 + i)), Command::Ignore);
        }
        assert_eq!(q.lengths().req, 1);

        let popped = q.fetch_request().unwrap();
        assert_eq!(popped.item.duplicates.len(), 4);
    }

    #[test]
    fn duplicate_of_dirty_item_is_not_done_and_discarded() {
        let q = RequestQueue::new(20);
        let dirty = render_request("default", 1, 1, 1, Command::Dirty);
        assert_eq!(q.add_request(&dirty, None), Command::NotDone);

        let render = render_request("default", 1, 1, 1, Command::Render);
        assert_eq!(q.add_request(&render, Some(9)), Command::NotDone);

        assert_eq!(q.lengths().dirty, 1);
        let popped = q.fetch_request().unwrap();
        assert!(popped.item.duplicates.is_empty());
    }

    #[test]
    fn duplicate_waiter_keeps_its_own_xy_not_the_metatile_origin() {
        let q = RequestQueue::new(20);
        let primary = render_request("default", 0, 0, 1, Command::Render);
        assert_eq!(q.add_request(&primary, Some(1)), Command::Ignore);

        let dup = render_request("default", 1, 1, 1, Command::Render);
        assert_eq!(q.add_request(&dup, Some(2)), Command::Ignore);

        let popped = q.fetch_request().unwrap();
        assert_eq!(popped.item.x, 0);
        assert_eq!(popped.item.y, 0);
        assert_eq!(popped.item.mx, 0);
        assert_eq!(popped.item.my, 0);

        assert_eq!(popped.item.duplicates.len(), 1);
        let waiter = &popped.item.duplicates[0];
        assert_eq!(waiter.x, 1);
        assert_eq!(waiter.y, 1);
        assert_eq!(waiter.client_fd, Some(2));
    }

    #[test]
    fn dirty_duplicate_of_in_flight_render_gets_no_client_fd() {
        let q = RequestQueue::new(20);
        let primary = render_request("default", 0, 0, 1, Command::Render);
        assert_eq!(q.add_request(&primary, Some(1)), Command::Ignore);

        let dirty = render_request("default", 0, 0, 1, Command::Dirty);
        assert_eq!(q.add_request(&dirty, Some(9)), Command::NotDone);

        let popped = q.fetch_request().unwrap();
        assert_eq!(popped.item.duplicates.len(), 1);
        let waiter = &popped.item.duplicates[0];
        assert_eq!(waiter.cmd, Command::Dirty);
        assert_eq!(waiter.client_fd, None);
        assert!(!waiter.cmd.is_render_request());
    }

    #[test]
    fn fetch_follows_strict_priority_order() {
        let q = RequestQueue::new(20);
        q.add_request(&render_request("s", 80, 0, 10, Command::RenderPrio), None);
        q.add_request(&render_request("s", 88, 0, 10, Command::Render), None);
        q.add_request(&render_request("s", 96, 0, 10, Command::RenderLow), None);
        q.add_request(&render_request("s", 104, 0, 10, Command::Dirty), None);
        q.add_request(&render_request("s", 112, 0, 10, Command::RenderBulk), None);

        let order: Vec<QueueTag> = (0..5).map(|_| q.fetch_request().unwrap().item.origin_tag).collect();
        assert_eq!(
            order,
            vec![
                QueueTag::RequestPrio,
                QueueTag::Request,
                QueueTag::RequestLow,
                QueueTag::Dirty,
                QueueTag::RequestBulk,
            ]
        );
    }

    #[test]
    fn overflow_and_rejection_policy() {
        let q = RequestQueue::new(20);
        let total = 2 * REQ_LIMIT + DIRTY_LIMIT + 2;
        let mut responses = Vec::new();
        for i in 0..total {
            let x = (i as i32) * 8; // distinct metatiles, no dedup
            let req = render_request("s", x, 0, 12, Command::RenderPrio);
            responses.push(q.add_request(&req, None));
        }

        let lengths = q.lengths();
        assert_eq!(lengths.req_prio, REQ_LIMIT);
        assert_eq!(lengths.dirty, DIRTY_LIMIT);

        let ignore_count = responses.iter().filter(|c| **c == Command::Ignore).count();
        let not_done_count = responses
            .iter()
            .filter(|c| **c == Command::NotDone)
            .count();
        assert_eq!(ignore_count, REQ_LIMIT);
        assert_eq!(not_done_count, total - REQ_LIMIT);
    }

    #[test]
    fn clear_by_fd_invalidates_without_shrinking_lists() {
        let q = RequestQueue::new(20);
        let req = render_request("s", 0, 0, 5, Command::Render);
        q.add_request(&req, Some(42));
        let lengths_before = q.lengths();

        q.clear_by_fd(42);

        assert_eq!(q.lengths(), lengths_before);
        let popped = q.fetch_request().unwrap();
        assert_eq!(popped.item.client_fd, None);
    }

    #[test]
    fn remove_request_credits_origin_and_zoom_stats() {
        let q = RequestQueue::new(20);
        let req = render_request("s", 0, 0, 7, Command::RenderPrio);
        q.add_request(&req, Some(1));
        let popped = q.fetch_request().unwrap();
        q.remove_request(popped.id, Some(250));

        let stats = q.stats();
        assert_eq!(stats.time_req_prio_render, 250);
        assert_eq!(stats.no_zoom_render[7], 1);
        assert_eq!(stats.time_zoom_render[7], 250);
    }
}
