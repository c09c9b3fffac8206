//! Best-effort hygiene for transient secret material.
//!
//! Raw PINs, derived keys, and hash digests live in byte buffers for as short
//! a window as possible. This module tracks those buffers without owning
//! them, wipes them on demand, and runs a background sweep that force-clears
//! anything that outlives the retention ceiling.

use parking_lot::{Condvar, Mutex};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// Secrets must not live past this, even while still referenced.
pub const MAX_RETENTION: Duration = Duration::from_secs(5 * 60);
pub const WIPE_PASSES: usize = 3;
/// Buffers above this are allocated/freed directly instead of pooled.
pub const MAX_POOLED_SIZE: usize = 4 * 1024;
const MAX_POOL_ENTRIES: usize = 16;

/// Shared handle for a buffer registered with [`SecretHygiene`].
pub type SecretBuf = Arc<Mutex<Vec<u8>>>;

/// Multi-pass destructive overwrite. The final pass goes through `zeroize`,
/// whose compiler fences keep the stores from being elided as dead writes.
pub fn secure_wipe_bytes(buf: &mut [u8]) {
    for _ in 0..WIPE_PASSES {
        OsRng.fill_bytes(buf);
    }
    buf.zeroize();
}

/// Char variant for secrets that arrive as text (PIN entry widgets). The
/// fence keeps the final zero pass from being elided as dead stores.
pub fn secure_wipe_chars(buf: &mut [char]) {
    for _ in 0..WIPE_PASSES {
        for c in buf.iter_mut() {
            *c = OsRng.gen_range(' '..='~');
        }
    }
    for c in buf.iter_mut() {
        *c = '\0';
    }
    std::sync::atomic::compiler_fence(Ordering::SeqCst);
}

struct TrackedBuffer {
    handle: Weak<Mutex<Vec<u8>>>,
    description: String,
    registered_at: Instant,
    cleared: bool,
}

struct HygieneInner {
    registry: Mutex<HashMap<u64, TrackedBuffer>>,
    pool: Mutex<Vec<Vec<u8>>>,
    next_id: AtomicU64,
    running: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
    sweep_interval: Duration,
    max_retention: Duration,
    memory_protection: bool,
}

pub struct SecretHygiene {
    inner: Arc<HygieneInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SecretHygiene {
    pub fn new(memory_protection: bool) -> Self {
        Self::with_settings(memory_protection, SWEEP_INTERVAL, MAX_RETENTION)
    }

    pub fn with_settings(
        memory_protection: bool,
        sweep_interval: Duration,
        max_retention: Duration,
    ) -> Self {
        let inner = Arc::new(HygieneInner {
            registry: Mutex::new(HashMap::new()),
            pool: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            sweep_interval,
            max_retention,
            memory_protection,
        });
        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("hygiene-sweep".into())
            .spawn(move || sweep_loop(worker_inner))
            .expect("spawn hygiene sweep thread");
        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Track `buffer` for eventual forced wipe. The registry holds only a
    /// weak handle; a collected buffer counts as implicitly cleared.
    pub fn register(&self, buffer: &SecretBuf, description: &str) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.registry.lock().insert(
            id,
            TrackedBuffer {
                handle: Arc::downgrade(buffer),
                description: description.to_string(),
                registered_at: Instant::now(),
                cleared: false,
            },
        );
        id
    }

    /// Wipe the buffer behind `id` if it is still reachable. Idempotent.
    pub fn clear(&self, id: u64) {
        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.get_mut(&id) {
            if entry.cleared {
                return;
            }
            if let Some(buffer) = entry.handle.upgrade() {
                self.inner.wipe(&mut buffer.lock());
            }
            entry.cleared = true;
        }
    }

    /// Wipe every tracked buffer. Used on app backgrounding and shutdown.
    pub fn clear_all(&self) -> usize {
        let mut registry = self.inner.registry.lock();
        let mut cleared = 0;
        for entry in registry.values_mut() {
            if entry.cleared {
                continue;
            }
            if let Some(buffer) = entry.handle.upgrade() {
                self.inner.wipe(&mut buffer.lock());
                cleared += 1;
            }
            entry.cleared = true;
        }
        cleared
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Wipe a buffer the caller owns directly, without registering it.
    pub fn wipe_bytes(&self, buf: &mut [u8]) {
        self.inner.wipe(buf);
    }

    /// Fixed-time equality for hashes and tokens.
    pub fn secure_compare(&self, a: &[u8], b: &[u8]) -> bool {
        crate::crypto::secure_compare(a, b)
    }

    pub fn secure_random(&self, len: usize) -> Vec<u8> {
        crate::crypto::secure_random(len)
    }

    /// Pool: hand out a zero-filled buffer of exactly `size` bytes.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        if size > MAX_POOLED_SIZE {
            return vec![0u8; size];
        }
        let mut pool = self.inner.pool.lock();
        if let Some(pos) = pool.iter().position(|b| b.capacity() >= size) {
            let mut buf = pool.swap_remove(pos);
            buf.resize(size, 0);
            // Zeroize the slice, not the Vec: Vec's impl truncates to len 0.
            buf.as_mut_slice().zeroize();
            return buf;
        }
        vec![0u8; size]
    }

    /// Pool: wipe and take back a buffer handed out by [`acquire`].
    ///
    /// [`acquire`]: SecretHygiene::acquire
    pub fn release(&self, mut buf: Vec<u8>) {
        self.inner.wipe(&mut buf);
        if buf.capacity() > MAX_POOLED_SIZE {
            return;
        }
        let mut pool = self.inner.pool.lock();
        if pool.len() < MAX_POOL_ENTRIES {
            pool.push(buf);
        }
    }

    /// Stop the sweep worker (synchronous), then destroy everything still
    /// tracked and drain the pool. Idempotent.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        {
            let _guard = self.inner.wake_lock.lock();
            self.inner.wake.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("hygiene sweep thread panicked");
            }
        }
        let cleared = self.clear_all();
        self.inner.registry.lock().clear();
        let mut pool = self.inner.pool.lock();
        for buf in pool.iter_mut() {
            self.inner.wipe(buf);
        }
        pool.clear();
        info!(cleared, "secret hygiene shut down");
    }
}

impl Drop for SecretHygiene {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl HygieneInner {
    fn wipe(&self, buf: &mut [u8]) {
        if self.memory_protection {
            secure_wipe_bytes(buf);
        } else {
            // Mandatory zero-fill even with the hardening switched off.
            buf.zeroize();
        }
    }

    /// One registry pass: drop dead or already-cleared entries, force-clear
    /// anything past the retention ceiling.
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut registry = self.registry.lock();
        let mut swept = 0;
        registry.retain(|&id, entry| {
            let buffer = match entry.handle.upgrade() {
                Some(buffer) => buffer,
                None => {
                    swept += 1;
                    return false;
                }
            };
            if entry.cleared {
                swept += 1;
                return false;
            }
            if now.duration_since(entry.registered_at) >= self.max_retention {
                debug!(id, description = %entry.description, "retention ceiling hit, force-clearing");
                self.wipe(&mut buffer.lock());
                swept += 1;
                return false;
            }
            true
        });
        swept
    }
}

fn sweep_loop(inner: Arc<HygieneInner>) {
    let mut guard = inner.wake_lock.lock();
    while inner.running.load(Ordering::SeqCst) {
        inner.wake.wait_for(&mut guard, inner.sweep_interval);
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let swept = inner.sweep();
        if swept > 0 {
            debug!(swept, "hygiene sweep pass");
        }
    }
}
