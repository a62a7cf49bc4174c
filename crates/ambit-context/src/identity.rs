//! Invocation identity derivation
//!
//! Every registration call leaves a *landmark* on the storage of the
//! execution unit it runs on: a thread-local stack for synchronous work and
//! a task-local slot for async scopes. The invocation key is a 64-bit
//! checksum over the landmark's one-line textual signature, so any code in
//! the dynamic extent of the registration call derives the same key
//! without a token being passed down to it.
//!
//! A thread landmark remembers the tokio task that pushed it. Other tasks
//! polled on the same thread while the synchronous frame is active (a
//! nested `block_on`, or a foreign task resumed by it) do not see it.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use crc::{Crc, CRC_64_XZ};
use tokio::task;

/// Leading token of every landmark signature
const LANDMARK_TAG: &str = "ambit::with_context::landmark";

/// Reflected CRC-64 over the ECMA-182 polynomial with inverted init and output
static KEY_CHECKSUM: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

// Orders landmarks across thread and task storage; higher is more recent.
static LANDMARK_SEQ: AtomicU64 = AtomicU64::new(1);
static TASK_SCOPE_SEQ: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_LANDMARKS: RefCell<Vec<ThreadFrame>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_LANDMARK: Landmark;
}

/// Identity of one active registration call. `0` means "no identity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InvocationKey(u64);

impl InvocationKey {
    /// Sentinel returned when no landmark is visible
    pub const NONE: InvocationKey = InvocationKey(0);

    /// Wrap a raw key value
    pub const fn from_raw(raw: u64) -> Self {
        InvocationKey(raw)
    }

    /// Checksum a landmark signature into a key.
    ///
    /// A zero checksum is remapped to one so a real landmark never yields
    /// the sentinel.
    pub fn from_signature(signature: &str) -> Self {
        match KEY_CHECKSUM.checksum(signature.as_bytes()) {
            0 => InvocationKey(1),
            raw => InvocationKey(raw),
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for InvocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// The unit of execution a landmark belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionUnit {
    /// An OS thread running synchronous work
    Thread(ThreadId),
    /// One async scope, numbered process-wide
    Task(u64),
}

impl ExecutionUnit {
    /// The calling thread
    pub fn current_thread() -> Self {
        ExecutionUnit::Thread(thread::current().id())
    }

    /// A fresh async scope number
    pub fn next_task() -> Self {
        ExecutionUnit::Task(TASK_SCOPE_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionUnit::Thread(id) => write!(f, "thread:{id:?}"),
            ExecutionUnit::Task(n) => write!(f, "task:{n}"),
        }
    }
}

/// Marker left by a registration call for the duration of its work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Landmark {
    unit: ExecutionUnit,
    call_site: Option<&'static Location<'static>>,
    nonce: u64,
    seq: u64,
}

impl Landmark {
    /// Create a landmark for `unit`, optionally pinned to a call site
    pub fn new(
        unit: ExecutionUnit,
        call_site: Option<&'static Location<'static>>,
        nonce: u64,
    ) -> Self {
        Landmark {
            unit,
            call_site,
            nonce,
            seq: LANDMARK_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Replace the nonce, producing a different signature and key
    pub fn reseed(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.seq = LANDMARK_SEQ.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unit(&self) -> ExecutionUnit {
        self.unit
    }

    pub fn call_site(&self) -> Option<&'static Location<'static>> {
        self.call_site
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The one-line text the invocation key is derived from
    pub fn signature(&self) -> String {
        match self.call_site {
            Some(site) => format!(
                "{LANDMARK_TAG}(unit={}, site={}:{}:{}, nonce={:#x})",
                self.unit,
                site.file(),
                site.line(),
                site.column(),
                self.nonce
            ),
            None => format!(
                "{LANDMARK_TAG}(unit={}, site=-, nonce={:#x})",
                self.unit, self.nonce
            ),
        }
    }

    pub fn key(&self) -> InvocationKey {
        InvocationKey::from_signature(&self.signature())
    }
}

/// A thread landmark and the tokio task (if any) that pushed it
#[derive(Debug, Clone, Copy)]
struct ThreadFrame {
    landmark: Landmark,
    owner: Option<task::Id>,
}

impl ThreadFrame {
    fn visible_to(&self, current: Option<task::Id>) -> bool {
        self.owner == current
    }
}

/// Keeps a synchronous landmark on the current thread until dropped.
///
/// Not `Send`: the landmark must be removed from the thread it was pushed on.
#[derive(Debug)]
pub struct LandmarkGuard {
    seq: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for LandmarkGuard {
    fn drop(&mut self) {
        let seq = self.seq;
        let _ = THREAD_LANDMARKS.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|frame| frame.landmark.seq == seq) {
                stack.remove(pos);
            }
        });
    }
}

/// Push a landmark onto the current thread's stack.
///
/// The landmark is owned by the tokio task currently being polled, or by no
/// task when called outside one. Returns `None` when thread-local storage is
/// no longer accessible (the thread is being torn down).
pub fn enter(landmark: Landmark) -> Option<LandmarkGuard> {
    let frame = ThreadFrame {
        landmark,
        owner: task::try_id(),
    };
    THREAD_LANDMARKS
        .try_with(|stack| stack.borrow_mut().push(frame))
        .ok()
        .map(|()| LandmarkGuard {
            seq: landmark.seq,
            _not_send: PhantomData,
        })
}

/// Run `fut` with `landmark` as the current task's landmark
pub async fn scope_task<F: Future>(landmark: Landmark, fut: F) -> F::Output {
    TASK_LANDMARK.scope(landmark, fut).await
}

/// The innermost landmark visible from the current execution unit
pub fn current_landmark() -> Option<Landmark> {
    let current = task::try_id();
    let thread_top = THREAD_LANDMARKS
        .try_with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|frame| frame.visible_to(current))
                .map(|frame| frame.landmark)
        })
        .ok()
        .flatten();
    let task_top = TASK_LANDMARK.try_with(|landmark| *landmark).ok();

    match (thread_top, task_top) {
        (Some(sync), Some(task)) => Some(if sync.seq > task.seq { sync } else { task }),
        (sync, task) => sync.or(task),
    }
}

/// Derive the key of the active invocation, or `InvocationKey::NONE`
pub fn derive_key() -> InvocationKey {
    current_landmark().map_or(InvocationKey::NONE, |landmark| landmark.key())
}

/// Signature text of the active invocation's landmark
pub fn frame_signature() -> Option<String> {
    current_landmark().map(|landmark| landmark.signature())
}
