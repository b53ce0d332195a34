//! The arena-resident item type and its identity key.
//!
//! The original daemon threads every queued request through seven
//! intrusive doubly-linked lists plus a hash index of raw pointers. Here
//! each item lives in one slot of the queue's arena; which list it
//! belongs to is just a field (`QueueTag`), and the index maps directly
//! to arena slots instead of chasing `item_idx` buckets.

use crate::wire::Command;

/// Index into the request queue's item arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ItemId(pub(crate) usize);

/// Which of the six "live" lists an item currently belongs to. There is no
/// `Duplicate` variant: a duplicate is never arena-resident on its own,
/// it is recorded directly on the primary item's `duplicates` list (see
/// module docs).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueueTag {
    Request,
    RequestPrio,
    RequestLow,
    RequestBulk,
    Dirty,
    Render,
}

/// A client waiting on the same bundle as some already-queued item. Holds
/// just enough to answer it later: the descriptor to notify (`None` once
/// disconnected or if this waiter is a `Dirty` submission, which never
/// gets a reply), its own original `x`/`y` (spec §3 invariant 6: replies
/// echo the requester's own coordinates, not the metatile origin), and
/// the wire shape needed to build its response.
#[derive(Clone, Debug)]
pub struct DuplicateWaiter {
    pub client_fd: Option<i32>,
    pub cmd: Command,
    pub wire_ver: i32,
    pub x: i32,
    pub y: i32,
    pub mime_type: String,
    pub options: String,
}

/// One in-flight render request. `mx`/`my` are the metatile origin;
/// `x`/`y` are the tile coordinates the client actually asked for and
/// are what gets echoed back in its response. `duplicates` accumulates
/// every later request for the same `(style_name, mx, my, z)` while this
/// item is still pending.
#[derive(Clone, Debug)]
pub struct Item {
    pub style_name: String,
    pub options: String,
    pub mime_type: String,
    pub x: i32,
    pub y: i32,
    pub mx: i32,
    pub my: i32,
    pub z: i32,
    pub cmd: Command,
    pub wire_ver: i32,
    pub client_fd: Option<i32>,
    pub current_tag: QueueTag,
    pub origin_tag: QueueTag,
    pub duplicates: Vec<DuplicateWaiter>,
}

impl Item {
    /// Sets every descriptor matching `fd` to invalid, on this item and
    /// on its whole duplicate chain (spec §4.E `clear_by_fd`).
    pub fn clear_fd(&mut self, fd: i32) {
        if self.client_fd == Some(fd) {
            self.client_fd = None;
        }
        for dup in &mut self.duplicates {
            if dup.client_fd == Some(fd) {
                dup.client_fd = None;
            }
        }
    }
}

/// The `(style_name, mx, my, z)` fingerprint used to find the pending
/// item for a new request. The original hashes this down into a
/// `HASHIDX_SIZE`-bucket table; keeping the full tuple as the key avoids
/// reimplementing bucket-chain collision handling for no benefit here.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Fingerprint {
    style_name: String,
    mx: i32,
    my: i32,
    z: i32,
}

impl Fingerprint {
    pub fn new(style_name: &str, mx: i32, my: i32, z: i32) -> Self {
        Fingerprint {
            style_name: style_name.to_string(),
            mx,
            my,
            z,
        }
    }

    /// Mirrors `calcHashKey`'s bucket formula for log/debug parity with
    /// the original; not used for correctness since [`Fingerprint`]
    /// itself is the map key.
    pub fn legacy_bucket(&self, bucket_count: u64) -> u64 {
        let name_sum: u64 = self.style_name.bytes().map(|b| b as u64).sum();
        let key = ((name_sum & 0x1FF) << 52)
            + ((self.z as u64) << 48)
            + (((self.mx as u64) & 0xFFFFFF) << 24)
            + ((self.my as u64) & 0xFFFFFF);
        key % bucket_count
    }
}
