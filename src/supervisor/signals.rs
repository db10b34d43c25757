//! Process-wide signal latches and handler installation.
//!
//! Signal delivery is process-scoped, so the latches are the one genuine
//! global in the crate. The handlers do only what is async-signal-safe:
//! latch an atomic, and for external signals restore the saved dispositions.
//! Acting on a latch (terminating the tree) is the monitor thread's job.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Latched when the child posts SIGUSR1, meaning exec failed.
static EXEC_FAILED: AtomicBool = AtomicBool::new(false);
/// Latched once by the first external signal.
static EXTERNAL_CAUGHT: AtomicBool = AtomicBool::new(false);
/// The external signal that latched, for diagnostics.
static EXTERNAL_SIGNAL: AtomicI32 = AtomicI32::new(0);
/// Set after all saved-disposition slots are initialised.
static SAVED_READY: AtomicBool = AtomicBool::new(false);

/// The externally delivered signals the supervisor intercepts. SIGKILL is
/// uncatchable; installation is attempted for parity with the rest and its
/// failure ignored.
const EXTERNAL_SIGNALS: [i32; 5] = [
    libc::SIGINT,
    libc::SIGSEGV,
    libc::SIGKILL,
    libc::SIGTERM,
    libc::SIGABRT,
];

struct SavedActions(UnsafeCell<[MaybeUninit<libc::sigaction>; EXTERNAL_SIGNALS.len()]>);

// SAFETY: the slots are written exactly once, during installation and before
// SAVED_READY is set; afterwards they are only read.
unsafe impl Sync for SavedActions {}

static SAVED: SavedActions =
    SavedActions(UnsafeCell::new([MaybeUninit::uninit(); EXTERNAL_SIGNALS.len()]));

extern "C" fn on_exec_failure(_signal: libc::c_int) {
    EXEC_FAILED.store(true, Ordering::SeqCst);
}

extern "C" fn on_external_signal(signal: libc::c_int) {
    if EXTERNAL_CAUGHT.swap(true, Ordering::SeqCst) {
        return;
    }
    EXTERNAL_SIGNAL.store(signal, Ordering::SeqCst);
    // SAFETY: sigaction is async-signal-safe; restore_saved checks that the
    // slots were initialised.
    unsafe { restore_saved() };
}

fn action_for(handler: extern "C" fn(libc::c_int)) -> libc::sigaction {
    // SAFETY: a zeroed sigaction is a valid empty-mask, no-flags template.
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as usize;
    action
}

/// Installs the SIGUSR1 handler that latches exec failure. Installed before
/// the fork so the notification cannot be missed.
pub fn install_exec_failure_handler() {
    let action = action_for(on_exec_failure);
    // SAFETY: valid action struct; the previous disposition is not needed.
    unsafe { libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut()) };
}

/// Installs the external-signal handlers, saving the previous dispositions
/// for the handler to restore.
pub fn install_external_handlers() {
    let action = action_for(on_external_signal);
    let saved = SAVED.0.get();
    for (i, signal) in EXTERNAL_SIGNALS.iter().enumerate() {
        // SAFETY: each slot is written exactly once here; a failed
        // installation (SIGKILL) leaves the zeroed default disposition in
        // the slot so restoration stays well-defined.
        unsafe {
            let slot = (*saved)[i].as_mut_ptr();
            if libc::sigaction(*signal, &action, slot) != 0 {
                *slot = std::mem::zeroed();
            }
        }
    }
    SAVED_READY.store(true, Ordering::SeqCst);
}

// SAFETY contract: only called after install_external_handlers completed,
// which SAVED_READY guards.
unsafe fn restore_saved() {
    if !SAVED_READY.load(Ordering::SeqCst) {
        return;
    }
    let saved = SAVED.0.get();
    for (i, signal) in EXTERNAL_SIGNALS.iter().enumerate() {
        // SAFETY: the slot was initialised before SAVED_READY was set.
        unsafe { libc::sigaction(*signal, (*saved)[i].as_ptr(), std::ptr::null_mut()) };
    }
}

/// Puts the previous dispositions back. Safe to call even when the handlers
/// were never installed.
pub fn restore_external_handlers() {
    // SAFETY: guarded by SAVED_READY.
    unsafe { restore_saved() }
}

/// Whether the child reported an exec failure.
pub fn exec_failure_caught() -> bool {
    EXEC_FAILED.load(Ordering::SeqCst)
}

/// Whether an external signal was caught.
pub fn external_signal_caught() -> bool {
    EXTERNAL_CAUGHT.load(Ordering::SeqCst)
}

/// The external signal that latched, or 0.
pub fn external_signal() -> i32 {
    EXTERNAL_SIGNAL.load(Ordering::SeqCst)
}
