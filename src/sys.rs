//! Thin wrappers around the OS interfaces the supervisor consumes.
//!
//! Everything unsafe in the crate lives here, in small blocks with obvious
//! contracts. The child-side path between `fork` and `exec` is restricted to
//! async-signal-safe calls; `ExecImage` therefore prepares all of its
//! allocations up front.

use std::ffi::CString;
use std::io;

/// Page size in bytes.
pub fn page_size() -> i64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let res = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if res <= 0 { 4096 } else { res }
}

/// Kernel clock ticks per second (USER_HZ).
pub fn clock_ticks() -> i64 {
    // SAFETY: as above.
    let res = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if res <= 0 { 100 } else { res }
}

/// One page expressed in MB.
pub fn memory_per_page_mb() -> f64 {
    page_size() as f64 / (1u64 << 20) as f64
}

/// Physical memory in MB.
pub fn physical_memory_mb() -> f64 {
    // SAFETY: as above.
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    if pages <= 0 {
        return 0.0;
    }
    pages as f64 * memory_per_page_mb()
}

/// The 1-minute load average, if the kernel reports one.
pub fn load_average() -> Option<f64> {
    let mut load = 0.0f64;
    // SAFETY: getloadavg writes at most one sample into the provided slot.
    let res = unsafe { libc::getloadavg(&mut load, 1) };
    (res == 1).then_some(load)
}

/// Seconds on the TAI clock, or -1 when unavailable.
///
/// TAI never jumps with wall-clock adjustments, which keeps the real-time
/// limit meaningful across NTP steps and leap seconds.
pub fn tai_time() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime writes the timespec on success.
    let res = unsafe { libc::clock_gettime(libc::CLOCK_TAI, &mut ts) };
    if res != 0 {
        return -1.0;
    }
    ts.tv_sec as f64 + 1e-9 * ts.tv_nsec as f64
}

/// Seconds elapsed since `start_tai`, or -1 when the start was unavailable.
pub fn elapsed_real(start_tai: f64) -> f64 {
    if start_tai < 0.0 {
        return -1.0;
    }
    tai_time() - start_tai
}

pub fn process_id() -> i32 {
    // SAFETY: cannot fail.
    unsafe { libc::getpid() }
}

pub fn parent_process_id() -> i32 {
    // SAFETY: cannot fail.
    unsafe { libc::getppid() }
}

pub fn process_group_id() -> i32 {
    // SAFETY: pid 0 queries the calling process.
    unsafe { libc::getpgid(0) }
}

pub fn session_id() -> i32 {
    // SAFETY: pid 0 queries the calling process.
    unsafe { libc::getsid(0) }
}

/// Result of `fork`.
pub enum Forked {
    /// In the parent; carries the child's pid.
    Parent(i32),
    /// In the child.
    Child,
}

pub fn fork() -> io::Result<Forked> {
    // SAFETY: the child side of this fork only runs async-signal-safe code
    // before exec (see `ExecImage`).
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(Forked::Child),
        pid => Ok(Forked::Parent(pid)),
    }
}

/// Posts `signal` to `pid`. Failure (typically ESRCH for an already-exited
/// pid) is irrelevant to every caller.
pub fn send_signal(pid: i32, signal: i32) {
    // SAFETY: posting a signal has no memory preconditions.
    unsafe { libc::kill(pid, signal) };
}

/// Re-raises `signal` in the current process.
pub fn raise_signal(signal: i32) {
    // SAFETY: as above.
    unsafe { libc::raise(signal) };
}

/// Exits without running any atexit machinery. The only safe exit on the
/// child side of a fork.
pub fn exit_child(code: i32) -> ! {
    // SAFETY: _exit is async-signal-safe and does not return.
    unsafe { libc::_exit(code) }
}

/// Decoded status of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled(i32),
    Unknown,
}

/// Blocks until `pid` terminates, retrying across signal interruptions.
pub fn wait_for(pid: i32) -> WaitStatus {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: waitpid writes the status word on success.
        let res = unsafe { libc::waitpid(pid, &mut status, 0) };
        if res == pid {
            break;
        }
        if res == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return WaitStatus::Unknown;
    }

    if libc::WIFEXITED(status) {
        WaitStatus::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        WaitStatus::Signaled(libc::WTERMSIG(status))
    } else {
        WaitStatus::Unknown
    }
}

/// A command prepared for exec.
///
/// Built before the fork so the child does not allocate; the raw argv
/// pointers stay valid because they point into the owned `CString` buffers,
/// not into the vectors themselves.
pub struct ExecImage {
    program: CString,
    _args: Vec<CString>,
    argv: Vec<*const libc::c_char>,
}

impl ExecImage {
    /// Prepares `command[0]` with arguments `command[1..]`.
    pub fn new(command: &[String]) -> io::Result<Self> {
        let mut args = Vec::with_capacity(command.len());
        for word in command {
            args.push(CString::new(word.as_str()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "argument contains a NUL byte")
            })?);
        }
        let program = args
            .first()
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut argv: Vec<*const libc::c_char> = args.iter().map(|a| a.as_ptr()).collect();
        argv.push(std::ptr::null());

        Ok(Self {
            program,
            _args: args,
            argv,
        })
    }

    /// Replaces the current process image; only returns on failure.
    pub fn exec(&self) -> io::Error {
        // SAFETY: argv is a NULL-terminated array of pointers to
        // NUL-terminated strings, all owned by self.
        unsafe { libc::execvp(self.program.as_ptr(), self.argv.as_ptr()) };
        io::Error::last_os_error()
    }
}
