//! Terminating the supervised tree.
//!
//! Enforcement runs in rounds: re-read the process table, post a signal to
//! every descendant (children before parents, so nothing gets a chance to
//! reap and restart its own children), sleep, halve the delay. Early rounds
//! use SIGTERM to let processes clean up; once the delay shrinks below the
//! threshold the remaining processes get SIGKILL. The loop ends when a round
//! finds nothing to signal or the delay reaches the floor, which bounds it
//! at about ten rounds for the default initial delay.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::collector::{FileSystem, SampleSource};
use crate::supervisor::Shared;
use crate::sys;
use crate::tree::Registry;

/// SIGTERM at or above this per-round delay, SIGKILL below.
const TERM_THRESHOLD: Duration = Duration::from_millis(2);
/// No further rounds once the delay is at or below this.
const DELAY_FLOOR: Duration = Duration::from_millis(1);

pub(crate) fn signal_for_delay(delay: Duration) -> i32 {
    if delay >= TERM_THRESHOLD {
        libc::SIGTERM
    } else {
        libc::SIGKILL
    }
}

/// Terminates every process in the tree rooted at `root_pid`.
///
/// Idempotent: the first caller wins the `killing` latch, every later call
/// returns immediately. Once the latch is set the sampler stops mutating the
/// registry, so this function owns it for the rest of the run.
///
/// The re-read uses the current sample sequence without advancing it; the
/// kill walk only cares about activity and links, and the sampler is already
/// fenced off.
pub fn kill_tree<F: FileSystem>(
    source: &mut SampleSource<F>,
    registry: &mut Registry,
    shared: &Shared,
    root_pid: i32,
    initial_delay: Duration,
    single: bool,
    seq: u64,
) {
    if shared.begin_killing() {
        return;
    }

    debug!("killing all child processes");

    let mut delay = initial_delay;
    loop {
        // A /proc outage at this point means there is nothing left to
        // observe; enforcement must not abort the run.
        let read = source
            .snapshot_into(registry, seq, root_pid, single)
            .unwrap_or(0);
        registry.connect_tree(root_pid);

        let mut killed = 0;
        if read > 0
            && let Some(root) = registry.lookup(root_pid)
            && registry.entry(root).active
        {
            let signal = signal_for_delay(delay);
            let targets = registry.kill_order(root);
            for pid in &targets {
                debug!("kill {} with signal {}", pid, signal);
                sys::send_signal(*pid, signal);
            }
            killed = targets.len();
        }

        debug!("killed {} processes", killed);

        if killed == 0 || delay <= DELAY_FLOOR {
            break;
        }

        thread::sleep(delay);
        delay /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_rounds_terminate_late_rounds_kill() {
        assert_eq!(signal_for_delay(Duration::from_millis(512)), libc::SIGTERM);
        assert_eq!(signal_for_delay(Duration::from_millis(2)), libc::SIGTERM);
        assert_eq!(signal_for_delay(Duration::from_micros(1999)), libc::SIGKILL);
        assert_eq!(signal_for_delay(Duration::from_millis(1)), libc::SIGKILL);
    }

    #[test]
    fn default_delay_bounds_the_round_count() {
        let mut delay = Duration::from_millis(512);
        let mut rounds = 1;
        while delay > DELAY_FLOOR {
            delay /= 2;
            rounds += 1;
        }
        assert_eq!(rounds, 10);
    }

    #[test]
    fn killing_latch_makes_enforcement_idempotent() {
        let shared = Shared::new();
        assert!(!shared.begin_killing());
        assert!(shared.begin_killing());
        assert!(shared.begin_killing());
    }
}
