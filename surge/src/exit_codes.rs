use surge_core::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// Run completed but one or more thresholds failed.
    ThresholdsFailed = 11,

    /// Setup failed, a threshold tripped with abortOnFail, a VU requested abort, or Ctrl-C.
    Aborted = 20,

    /// Invalid CLI/plan/options (bad flags, invalid durations, invalid threshold syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => Self::Success,
            Verdict::Fail => Self::ThresholdsFailed,
            Verdict::Aborted => Self::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_maps_to_exit_code() {
        assert_eq!(ExitCode::from_verdict(Verdict::Pass).as_i32(), 0);
        assert_eq!(ExitCode::from_verdict(Verdict::Fail).as_i32(), 11);
        assert_eq!(ExitCode::from_verdict(Verdict::Aborted).as_i32(), 20);
    }
}
