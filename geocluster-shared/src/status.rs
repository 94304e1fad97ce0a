//! Stage status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a stage or job.
///
/// `0` is success. Any other value is a failure whose meaning belongs to the
/// component that produced it; callers pass it through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    /// Generic failure reported by the in-process engine.
    pub const FAILED: Status = Status(1);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Process exit code for this status.
    ///
    /// Exit codes keep only the low byte, so a failure whose low byte is zero
    /// (256, 512, ...) maps to [`Status::FAILED`]'s code instead of reading as success.
    pub const fn exit_code(self) -> u8 {
        if self.0 == 0 {
            return 0;
        }
        match self.0 as u8 {
            0 => Self::FAILED.0 as u8,
            code => code,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
