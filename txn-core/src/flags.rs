//! Participant result flags
//!
//! Every participant phase answers with a [`ResultFlags`]: exactly one
//! [`Outcome`] plus independent modifiers.
//!
//! | Modifier   | Meaning                                              |
//! |------------|------------------------------------------------------|
//! | `READONLY` | no commit/abort call needed                          |
//! | `NO_JOIN`  | commit/abort must be skipped for this participant    |
//! | `PAUSE`    | suspend the transaction, outcome not yet known       |
//! | `RETRY`    | restart the transaction; absorbs everything else     |
//!
//! Callers reason through the predicates only. The numeric encoding in
//! [`ResultFlags::bits`] exists for logs and interop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome component of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Participant is ready to commit
    Prepared,
    /// Participant vetoes the transaction
    Aborted,
}

/// Outcome plus modifiers returned by a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultFlags {
    outcome: Outcome,
    readonly: bool,
    no_join: bool,
    pause: bool,
    retry: bool,
}

const BIT_PREPARED: u32 = 0x01;
const BIT_RETRY: u32 = 0x02;
const BIT_PAUSE: u32 = 0x04;
const BIT_NO_JOIN: u32 = 0x40;
const BIT_READONLY: u32 = 0x80;

impl ResultFlags {
    /// Prepared, no modifiers
    pub const PREPARED: Self = Self::with_outcome(Outcome::Prepared);

    /// Aborted, no modifiers
    pub const ABORTED: Self = Self::with_outcome(Outcome::Aborted);

    /// Restart request; carries no outcome or modifier
    pub const RETRY: Self = Self {
        outcome: Outcome::Aborted,
        readonly: false,
        no_join: false,
        pause: false,
        retry: true,
    };

    const fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            readonly: false,
            no_join: false,
            pause: false,
            retry: false,
        }
    }

    /// Add `READONLY`
    pub const fn readonly(mut self) -> Self {
        if !self.retry {
            self.readonly = true;
        }
        self
    }

    /// Add `NO_JOIN`
    pub const fn no_join(mut self) -> Self {
        if !self.retry {
            self.no_join = true;
        }
        self
    }

    /// Add `PAUSE`
    pub const fn pause(mut self) -> Self {
        if !self.retry {
            self.pause = true;
        }
        self
    }

    /// Outcome component
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Restart requested
    pub fn is_retry(&self) -> bool {
        self.retry
    }

    /// Outcome is `Prepared` (never true for `RETRY`)
    pub fn is_prepared(&self) -> bool {
        !self.retry && self.outcome == Outcome::Prepared
    }

    /// Outcome is `Aborted`
    pub fn is_aborted(&self) -> bool {
        !self.is_prepared()
    }

    /// No commit/abort call needed
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Commit/abort must be skipped
    pub fn is_no_join(&self) -> bool {
        self.no_join
    }

    /// Transaction must suspend
    pub fn is_pause(&self) -> bool {
        self.pause
    }

    /// Combine two results.
    ///
    /// `RETRY` absorbs everything. Otherwise the outcome is `Prepared` only
    /// if both are, and modifiers are the union of both sides.
    pub fn combine(self, other: Self) -> Self {
        if self.retry || other.retry {
            return Self::RETRY;
        }
        let outcome = if self.is_prepared() && other.is_prepared() {
            Outcome::Prepared
        } else {
            Outcome::Aborted
        };
        Self {
            outcome,
            readonly: self.readonly || other.readonly,
            no_join: self.no_join || other.no_join,
            pause: self.pause || other.pause,
            retry: false,
        }
    }

    /// Merge the results of a group that acts as one participant.
    ///
    /// The first `RETRY` in list order wins outright. Otherwise the group is
    /// `Prepared` iff every member is, `READONLY` iff every member is, and
    /// `NO_JOIN` iff every member is. `PAUSE` never survives a merge. An
    /// empty group merges to `PREPARED | READONLY | NO_JOIN`.
    pub fn merge<'a>(results: impl IntoIterator<Item = &'a ResultFlags>) -> Self {
        let mut prepared = true;
        let mut readonly = true;
        let mut no_join = true;

        for rc in results {
            if rc.is_retry() {
                return Self::RETRY;
            }
            prepared &= rc.is_prepared();
            readonly &= rc.is_readonly();
            no_join &= rc.is_no_join();
        }

        let mut merged = if prepared { Self::PREPARED } else { Self::ABORTED };
        if readonly {
            merged = merged.readonly();
        }
        if no_join {
            merged = merged.no_join();
        }
        merged
    }

    /// Numeric encoding
    pub fn bits(&self) -> u32 {
        if self.retry {
            return BIT_RETRY;
        }
        let mut bits = 0;
        if self.outcome == Outcome::Prepared {
            bits |= BIT_PREPARED;
        }
        if self.pause {
            bits |= BIT_PAUSE;
        }
        if self.no_join {
            bits |= BIT_NO_JOIN;
        }
        if self.readonly {
            bits |= BIT_READONLY;
        }
        bits
    }

    /// Decode a numeric encoding; unknown bits are ignored
    pub fn from_bits(bits: u32) -> Self {
        if bits & BIT_RETRY != 0 {
            return Self::RETRY;
        }
        let mut flags = if bits & BIT_PREPARED != 0 {
            Self::PREPARED
        } else {
            Self::ABORTED
        };
        if bits & BIT_PAUSE != 0 {
            flags = flags.pause();
        }
        if bits & BIT_NO_JOIN != 0 {
            flags = flags.no_join();
        }
        if bits & BIT_READONLY != 0 {
            flags = flags.readonly();
        }
        flags
    }
}

impl fmt::Display for ResultFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.retry {
            return f.write_str("RETRY");
        }
        f.write_str(match self.outcome {
            Outcome::Prepared => "PREPARED",
            Outcome::Aborted => "ABORTED",
        })?;
        if self.pause {
            f.write_str("|PAUSE")?;
        }
        if self.no_join {
            f.write_str("|NO_JOIN")?;
        }
        if self.readonly {
            f.write_str("|READONLY")?;
        }
        Ok(())
    }
}
