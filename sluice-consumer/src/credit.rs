//! Byte-budget flow control for a single consumer.
//!
//! The budget starts at zero and is replenished by the client. Sends are
//! debited after the fact, once the transport reports the encoded size, so a
//! single oversized frame may push the budget below zero; that only blocks
//! the next admission.
//!
//! ```text
//! receive(-1)  budget becomes unbounded, flow control is off for good
//! receive(0)   budget reset to 0 (quiesce a slow consumer)
//! receive(n)   budget += n, delivery re-attempted on a <=0 -> >0 transition
//! ```

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::error::{ConsumerError, Result};

/// Outcome of applying a credit update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditUpdate {
    /// Flow control was switched off.
    Unbounded,
    /// The budget was reset to zero.
    Reset,
    /// Credits were added.
    Added { previous: i64, current: i64 },
    /// The budget is unbounded; the update has no effect.
    Ignored,
}

impl CreditUpdate {
    /// Whether a previously blocked consumer may now be able to accept.
    #[must_use]
    pub const fn unblocks(self) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Added { previous, current } => previous <= 0 && current > 0,
            Self::Reset | Self::Ignored => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct CreditController {
    unbounded: AtomicBool,
    available: AtomicI64,
}

impl CreditController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a credit update from the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::InvalidCredits`] for values below `-1`.
    pub fn receive(&self, credits: i32) -> Result<CreditUpdate> {
        if credits < -1 {
            return Err(ConsumerError::InvalidCredits(credits));
        }

        if self.unbounded.load(Ordering::Acquire) {
            return Ok(CreditUpdate::Ignored);
        }

        Ok(match credits {
            -1 => {
                self.unbounded.store(true, Ordering::Release);
                CreditUpdate::Unbounded
            }
            0 => {
                self.available.store(0, Ordering::Release);
                CreditUpdate::Reset
            }
            credits => {
                let credits = i64::from(credits);
                let previous = self.available.fetch_add(credits, Ordering::AcqRel);
                CreditUpdate::Added {
                    previous,
                    current: previous + credits,
                }
            }
        })
    }

    /// Whether a new admission is allowed.
    #[must_use]
    pub fn has_credit(&self) -> bool {
        self.unbounded.load(Ordering::Acquire) || self.available.load(Ordering::Acquire) > 0
    }

    /// Charge bytes already written to the transport.
    pub fn debit(&self, bytes: usize) {
        if self.unbounded.load(Ordering::Acquire) {
            return;
        }

        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        self.available.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Remaining budget, or `None` when flow control is off.
    #[must_use]
    pub fn available(&self) -> Option<i64> {
        if self.unbounded.load(Ordering::Acquire) {
            None
        } else {
            Some(self.available.load(Ordering::Acquire))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_blocked() {
        let credits = CreditController::new();
        assert!(!credits.has_credit());
        assert_eq!(credits.available(), Some(0));
    }

    #[test]
    fn test_add_transition_unblocks() {
        let credits = CreditController::new();

        let update = credits.receive(100).unwrap();
        assert_eq!(
            update,
            CreditUpdate::Added {
                previous: 0,
                current: 100
            }
        );
        assert!(update.unblocks());

        // Already positive, adding more is not a transition
        assert!(!credits.receive(10).unwrap().unblocks());
        assert_eq!(credits.available(), Some(110));
    }

    #[test]
    fn test_debit_may_go_negative() {
        let credits = CreditController::new();
        credits.receive(10).unwrap();

        credits.debit(25);
        assert_eq!(credits.available(), Some(-15));
        assert!(!credits.has_credit());

        // Not enough to cross zero
        assert!(!credits.receive(15).unwrap().unblocks());
        assert!(!credits.has_credit());

        assert!(credits.receive(1).unwrap().unblocks());
        assert!(credits.has_credit());
    }

    #[test]
    fn test_reset() {
        let credits = CreditController::new();
        credits.receive(50).unwrap();

        let update = credits.receive(0).unwrap();
        assert_eq!(update, CreditUpdate::Reset);
        assert!(!update.unblocks());
        assert!(!credits.has_credit());
    }

    #[test]
    fn test_unbounded_is_final() {
        let credits = CreditController::new();
        assert!(credits.receive(-1).unwrap().unblocks());
        assert_eq!(credits.available(), None);

        credits.debit(1_000_000);
        assert!(credits.has_credit());

        assert_eq!(credits.receive(0).unwrap(), CreditUpdate::Ignored);
        assert_eq!(credits.receive(10).unwrap(), CreditUpdate::Ignored);
        assert_eq!(credits.available(), None);
    }

    #[test]
    fn test_rejects_invalid() {
        let credits = CreditController::new();
        assert!(matches!(
            credits.receive(-2),
            Err(ConsumerError::InvalidCredits(-2))
        ));
    }
}
