//! Classification of a supervised run.

/// How the run ended. Computed after the wait returns, from the child's
/// status and the latches, with out-of-time taking precedence at
/// finalisation when the recorded maxima crossed a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    OutOfTime,
    OutOfMemory,
    SegmentationFault,
    BusError,
    ForkFailed,
    InternalError,
    ExecFailed,
    OtherSignal,
}

impl Outcome {
    /// Classifies a child that was terminated by `signal`.
    pub fn from_signal(signal: i32) -> Self {
        match signal {
            libc::SIGXFSZ => Outcome::OutOfMemory,
            libc::SIGXCPU => Outcome::OutOfTime,
            libc::SIGSEGV => Outcome::SegmentationFault,
            libc::SIGBUS => Outcome::BusError,
            _ => Outcome::OtherSignal,
        }
    }

    /// The `status` record value. `signal` is only consulted for
    /// `OtherSignal`.
    pub fn describe(self, signal: i32) -> String {
        match self {
            Outcome::Ok => "ok".to_string(),
            Outcome::OutOfTime => "out of time".to_string(),
            Outcome::OutOfMemory => "out of memory".to_string(),
            Outcome::SegmentationFault => "segmentation fault".to_string(),
            Outcome::BusError => "bus error".to_string(),
            Outcome::ForkFailed => "fork failed".to_string(),
            Outcome::InternalError => "internal error".to_string(),
            Outcome::ExecFailed => "execvp failed".to_string(),
            Outcome::OtherSignal => format!("signal({})", signal),
        }
    }

    /// The supervisor's exit code. `child_code` is what the child itself
    /// reported and only matters for `Ok`.
    pub fn exit_code(self, child_code: i32) -> i32 {
        match self {
            Outcome::Ok => child_code,
            Outcome::ExecFailed => 1,
            Outcome::OutOfTime => 2,
            Outcome::OutOfMemory => 3,
            Outcome::SegmentationFault => 4,
            Outcome::BusError => 5,
            Outcome::ForkFailed => 6,
            Outcome::InternalError => 7,
            Outcome::OtherSignal => 11,
        }
    }

    /// Whether `--kill` re-raises the child's terminating signal for this
    /// outcome.
    pub fn is_signal_class(self) -> bool {
        matches!(
            self,
            Outcome::SegmentationFault | Outcome::BusError | Outcome::OtherSignal
        )
    }
}
