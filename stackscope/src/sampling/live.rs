//! In-process stack capture (Linux)
//!
//! [`ProcessStackSource`] captures every thread of the current process except
//! the one calling [`capture`](StackSource::capture). One capture round:
//!
//! ```text
//! /proc/self/task ──▶ publish round ──▶ tgkill(SIGPROF) per thread
//!                                              │
//!      handler on each target: claim its slot, walk its own stack
//!      into the slot's fixed buffer, mark the slot done
//!                                              │
//! wait for slots (timeout) ◀───────────────────┘
//! retract round, wait for in-flight handlers, resolve IPs off-signal
//! ```
//!
//! The handler never allocates or locks; it only stores raw instruction
//! pointers. Symbol resolution, demangling and thread naming happen on the
//! capturing thread. Frames belonging to the handler itself are cut at the
//! interrupted program counter taken from the signal context.

// Signal delivery and the shared capture buffers need raw libc calls
#![allow(unsafe_code)]

use log::{debug, warn};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::domain::{CaptureError, MethodId, SamplerError, Tid, Timestamp};

use super::{MonotonicClock, Snapshot, StackSource, ThreadStack};

/// Signal used to interrupt target threads.
pub const CAPTURE_SIGNAL: libc::c_int = libc::SIGPROF;

/// How long a round waits for threads to answer the signal.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(100);

/// Deepest stack recorded per thread, handler frames included.
const MAX_FRAMES: usize = 512;

/// Namespace of frames whose address resolves to no symbol.
pub const UNRESOLVED: &str = "[unknown]";

const HANDLER_NAME: &str = "capture_signal_handler";

// =============================================================================
// SIGNAL SIDE
// =============================================================================

const SLOT_PENDING: u8 = 0;
const SLOT_WRITING: u8 = 1;
const SLOT_DONE: u8 = 2;

/// Capture buffer of one target thread.
struct Slot {
    tid: libc::pid_t,
    state: AtomicU8,
    len: AtomicUsize,
    /// Index of the interrupted frame, `usize::MAX` if it was not found.
    start: AtomicUsize,
    ips: UnsafeCell<[usize; MAX_FRAMES]>,
}

// SAFETY: `ips` is written only by the handler that moved `state` from
// PENDING to WRITING, and read only after observing DONE with Acquire.
unsafe impl Sync for Slot {}

impl Slot {
    fn new(tid: libc::pid_t) -> Self {
        Self {
            tid,
            state: AtomicU8::new(SLOT_PENDING),
            len: AtomicUsize::new(0),
            start: AtomicUsize::new(usize::MAX),
            ips: UnsafeCell::new([0; MAX_FRAMES]),
        }
    }

    fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == SLOT_DONE
    }
}

struct Round {
    slots: Box<[Slot]>,
}

/// Round being captured, null between rounds.
static CURRENT_ROUND: AtomicPtr<Round> = AtomicPtr::new(ptr::null_mut());

/// Handlers currently between entry and exit.
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// One round at a time, process wide.
static ROUND_LOCK: Mutex<()> = Mutex::new(());

/// Outcome of installing the handler, as an OS error code.
static HANDLER_INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();

fn current_tid() -> libc::pid_t {
    // SAFETY: gettid has no preconditions and cannot fail
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    libc::pid_t::try_from(tid).unwrap_or(-1)
}

/// Program counter of the interrupted code, read from the signal context.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn interrupted_pc(context: *mut c_void) -> Option<usize> {
    if context.is_null() {
        return None;
    }
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: the kernel passes a valid ucontext_t to SA_SIGINFO handlers
        let uc = unsafe { &*context.cast::<libc::ucontext_t>() };
        Some(uc.uc_mcontext.gregs[libc::REG_RIP as usize] as usize)
    }
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: the kernel passes a valid ucontext_t to SA_SIGINFO handlers
        let uc = unsafe { &*context.cast::<libc::ucontext_t>() };
        Some(uc.uc_mcontext.pc as usize)
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        None
    }
}

extern "C" fn capture_signal_handler(
    _signal: libc::c_int,
    _info: *mut libc::siginfo_t,
    context: *mut c_void,
) {
    // SAFETY: errno is thread local; restored before returning
    let errno = unsafe { *libc::__errno_location() };
    IN_FLIGHT.fetch_add(1, Ordering::SeqCst);

    let round = CURRENT_ROUND.load(Ordering::SeqCst);
    if !round.is_null() {
        // SAFETY: the collector frees a round only after retracting it and
        // seeing IN_FLIGHT at zero, which cannot happen while we hold it
        let round = unsafe { &*round };
        let tid = current_tid();
        let claimed = round.slots.iter().find(|slot| slot.tid == tid).filter(|slot| {
            slot.state
                .compare_exchange(SLOT_PENDING, SLOT_WRITING, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        });
        if let Some(slot) = claimed {
            let pc = interrupted_pc(context);
            // SAFETY: the successful claim above makes this handler the only writer
            let buf = unsafe { &mut *slot.ips.get() };
            let mut count = 0usize;
            let mut start = usize::MAX;
            // SAFETY: rounds are serialized by ROUND_LOCK and each target
            // thread is signalled once per round, so walks never overlap
            // on the same thread
            unsafe {
                backtrace::trace_unsynchronized(|frame| {
                    let ip = frame.ip() as usize;
                    if start == usize::MAX && Some(ip) == pc {
                        start = count;
                    }
                    buf[count] = ip;
                    count += 1;
                    count < MAX_FRAMES
                });
            }
            slot.len.store(count, Ordering::Relaxed);
            slot.start.store(start, Ordering::Relaxed);
            slot.state.store(SLOT_DONE, Ordering::Release);
        }
    }

    IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    // SAFETY: see above
    unsafe { *libc::__errno_location() = errno };
}

fn install_handler() -> Result<(), SamplerError> {
    let installed = HANDLER_INSTALLED.get_or_init(|| {
        type Handler = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void);
        // SAFETY: a zeroed sigaction is a valid starting point; the handler
        // only touches atomics, its own slot and the unwinder
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = capture_signal_handler as Handler as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(CAPTURE_SIGNAL, &action, ptr::null_mut()) == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error().raw_os_error().unwrap_or(0))
            }
        }
    });
    (*installed).map_err(|code| SamplerError::SignalSetup(io::Error::from_raw_os_error(code)))
}

/// Raw instruction pointers of one thread, innermost first, handler frames cut.
struct RawStack {
    ips: Vec<usize>,
    /// Handler frames could not be located from the signal context.
    uncut: bool,
}

/// Signal every target and collect what answered within `timeout`.
fn collect_round(
    targets: &[libc::pid_t],
    timeout: Duration,
) -> Result<Vec<Option<RawStack>>, CaptureError> {
    let _guard = ROUND_LOCK
        .lock()
        .map_err(|_| CaptureError::Interrupted("capture lock poisoned".to_string()))?;

    let round = Box::new(Round {
        slots: targets.iter().map(|&tid| Slot::new(tid)).collect(),
    });
    let round_ptr = Box::into_raw(round);
    CURRENT_ROUND.store(round_ptr, Ordering::SeqCst);
    // SAFETY: reclaimed below only after no handler can reach it
    let live = unsafe { &*round_ptr };

    // SAFETY: getpid has no preconditions
    let pid = unsafe { libc::getpid() };
    let mut signalled = vec![false; live.slots.len()];
    for (slot, sent) in live.slots.iter().zip(signalled.iter_mut()) {
        // SAFETY: tgkill only delivers a signal; a stale tid yields ESRCH
        let rc = unsafe { libc::syscall(libc::SYS_tgkill, pid, slot.tid, CAPTURE_SIGNAL) };
        if rc == 0 {
            *sent = true;
        } else {
            debug!("Thread {} exited before it could be signalled", slot.tid);
        }
    }

    let deadline = Instant::now() + timeout;
    loop {
        let pending = live
            .slots
            .iter()
            .zip(&signalled)
            .filter(|&(slot, &sent)| sent && !slot.is_done())
            .count();
        if pending == 0 {
            break;
        }
        if Instant::now() >= deadline {
            debug!("{pending} threads did not answer within {timeout:?}");
            break;
        }
        thread::sleep(Duration::from_micros(50));
    }

    CURRENT_ROUND.store(ptr::null_mut(), Ordering::SeqCst);
    let drain_deadline = Instant::now() + timeout;
    while IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        if Instant::now() >= drain_deadline {
            // The round stays allocated: a stuck handler may still write into it
            warn!("Capture handler still running after {timeout:?}, abandoning round");
            return Err(CaptureError::Interrupted(
                "signal handler did not return".to_string(),
            ));
        }
        thread::yield_now();
    }

    // SAFETY: retracted and no handler in flight, so nothing else references it
    let round = unsafe { Box::from_raw(round_ptr) };
    let stacks = round
        .slots
        .iter()
        .map(|slot| {
            if !slot.is_done() {
                return None;
            }
            let len = slot.len.load(Ordering::Relaxed);
            let start = slot.start.load(Ordering::Relaxed);
            // SAFETY: DONE was observed with Acquire; the writer is finished
            let buf = unsafe { &*slot.ips.get() };
            let uncut = start == usize::MAX;
            let from = if uncut { 0 } else { start };
            Some(RawStack {
                ips: buf[from..len].to_vec(),
                uncut,
            })
        })
        .collect();
    Ok(stacks)
}

// =============================================================================
// SYMBOLS
// =============================================================================

/// Split a demangled Rust path at its last `::` outside angle brackets.
///
/// `<Foo as Bar>::run` becomes (`run`, `<Foo as Bar>`); a plain C symbol has
/// no namespace.
pub fn method_from_symbol(symbol: &str) -> MethodId {
    let bytes = symbol.as_bytes();
    let mut depth = 0i32;
    let mut split = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth -= 1,
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                split = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    match split {
        Some(at) => MethodId::new(&symbol[at + 2..], &symbol[..at]),
        None => MethodId::new(symbol, ""),
    }
}

/// Drop frames up to and including the handler and the signal trampoline.
fn strip_handler_frames(frames: &mut Vec<MethodId>) {
    let Some(handler) = frames.iter().position(|f| f.name == HANDLER_NAME) else {
        return;
    };
    let mut cut = handler + 1;
    if frames
        .get(cut)
        .is_some_and(|f| f.name == "__restore_rt" || f.namespace == UNRESOLVED)
    {
        cut += 1;
    }
    frames.drain(..cut);
}

/// Address → frames cache; an address may expand to several inlined frames.
#[derive(Debug, Default)]
struct SymbolCache {
    frames: HashMap<usize, Vec<MethodId>>,
}

impl SymbolCache {
    fn resolve(&mut self, raw: &RawStack) -> Vec<MethodId> {
        let mut frames = Vec::with_capacity(raw.ips.len());
        for (idx, &ip) in raw.ips.iter().enumerate() {
            // Return addresses point past the call; look up the call itself
            let lookup = if idx == 0 { ip } else { ip.saturating_sub(1) };
            let resolved = self.frames.entry(lookup).or_insert_with(|| {
                let mut symbols = Vec::new();
                backtrace::resolve(lookup as *mut c_void, |symbol| {
                    if let Some(name) = symbol.name() {
                        symbols.push(method_from_symbol(&format!("{name:#}")));
                    }
                });
                if symbols.is_empty() {
                    symbols.push(MethodId::new(format!("{ip:#x}"), UNRESOLVED));
                }
                symbols
            });
            frames.extend(resolved.iter().cloned());
        }
        if raw.uncut {
            strip_handler_frames(&mut frames);
        }
        frames
    }
}

// =============================================================================
// SOURCE
// =============================================================================

/// Which threads a [`ProcessStackSource`] captures.
#[derive(Debug, Clone)]
pub struct LiveCaptureConfig {
    /// Only threads whose name starts with this prefix; all when `None`.
    pub thread_prefix: Option<String>,
    /// How long a round waits for threads to answer.
    pub reply_timeout: Duration,
}

impl Default for LiveCaptureConfig {
    fn default() -> Self {
        Self {
            thread_prefix: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// [`StackSource`] sampling the threads of the running process.
///
/// Threads are named `"<comm> (<tid>)"` since kernel thread names are
/// truncated and rarely unique.
#[derive(Debug)]
pub struct ProcessStackSource {
    config: LiveCaptureConfig,
    clock: MonotonicClock,
    symbols: SymbolCache,
}

impl ProcessStackSource {
    /// Install the capture signal handler and create a source.
    ///
    /// # Errors
    /// Returns an error if the signal handler cannot be installed
    pub fn new(config: LiveCaptureConfig) -> Result<Self, SamplerError> {
        install_handler()?;
        Ok(Self {
            config,
            clock: MonotonicClock::new(),
            symbols: SymbolCache::default(),
        })
    }

    fn targets(&self) -> io::Result<Vec<(libc::pid_t, String)>> {
        let me = current_tid();
        let mut threads = Vec::new();
        for entry in fs::read_dir("/proc/self/task")? {
            let entry = entry?;
            let Some(tid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<libc::pid_t>().ok())
            else {
                continue;
            };
            if tid == me {
                continue;
            }
            // The thread may have exited since the listing
            let name = fs::read_to_string(entry.path().join("comm"))
                .map(|comm| comm.trim_end().to_string())
                .unwrap_or_default();
            if let Some(ref prefix) = self.config.thread_prefix {
                if !name.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            threads.push((tid, name));
        }
        threads.sort_unstable_by_key(|&(tid, _)| tid);
        Ok(threads)
    }
}

impl StackSource for ProcessStackSource {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn capture(&mut self) -> Result<Snapshot, CaptureError> {
        let targets = self
            .targets()
            .map_err(|e| CaptureError::Interrupted(format!("listing threads: {e}")))?;
        let tids: Vec<libc::pid_t> = targets.iter().map(|&(tid, _)| tid).collect();

        let time = self.clock.now();
        let raw = collect_round(&tids, self.config.reply_timeout)?;

        let threads = targets
            .into_iter()
            .zip(raw)
            .filter_map(|((tid, name), raw)| {
                let raw = raw?;
                let stack = ThreadStack::new(format!("{name} ({tid})"), self.symbols.resolve(&raw));
                Some(match u32::try_from(tid) {
                    Ok(tid) => stack.with_tid(Tid(tid)),
                    Err(_) => stack,
                })
            })
            .collect();

        Ok(Snapshot { time, threads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_rust_path() {
        let m = method_from_symbol("stackscope::sampling::live::collect_round");
        assert_eq!(m.name, "collect_round");
        assert_eq!(m.namespace, "stackscope::sampling::live");

        let m = method_from_symbol("<alloc::vec::Vec<T> as core::ops::Drop>::drop");
        assert_eq!(m.name, "drop");
        assert_eq!(m.namespace, "<alloc::vec::Vec<T> as core::ops::Drop>");

        let m = method_from_symbol("nanosleep");
        assert_eq!(m.name, "nanosleep");
        assert_eq!(m.namespace, "");
    }

    #[test]
    fn test_strip_handler_frames() {
        let mut frames = vec![
            MethodId::new("trace_unsynchronized", "backtrace"),
            MethodId::new(HANDLER_NAME, "stackscope::sampling::live"),
            MethodId::new("__restore_rt", ""),
            MethodId::new("park", "std::thread"),
        ];
        strip_handler_frames(&mut frames);
        assert_eq!(frames, vec![MethodId::new("park", "std::thread")]);

        let mut untouched = vec![MethodId::new("main", "app")];
        strip_handler_frames(&mut untouched);
        assert_eq!(untouched.len(), 1);
    }

    #[test]
    fn test_no_targets_gives_empty_snapshot() {
        let config = LiveCaptureConfig {
            thread_prefix: Some("no-such-thread-prefix".to_string()),
            ..LiveCaptureConfig::default()
        };
        let mut source = ProcessStackSource::new(config).unwrap();
        let snapshot = source.capture().unwrap();
        assert!(snapshot.threads.is_empty());
    }
}
