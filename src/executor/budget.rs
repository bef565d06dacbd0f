/// Ceiling on device-altering actions for one session.
///
/// `count` only grows and never passes `limit`. Key presses used for
/// navigation are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionBudget {
    count: u32,
    limit: u32,
}

impl ActionBudget {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }

    /// Counts one dispatched action. Returns false, leaving the count alone,
    /// when the budget is already spent.
    pub(crate) fn record(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_limit_is_exhausted_from_the_start() {
        let mut b = ActionBudget::new(0);
        assert!(b.is_exhausted());
        assert!(!b.record());
        assert_eq!(b.count(), 0);
        assert_eq!(b.remaining(), 0);
    }

    proptest! {
        #[test]
        fn count_is_monotonic_and_bounded(limit in 0u32..20, attempts in 0usize..40) {
            let mut b = ActionBudget::new(limit);
            let mut prev = 0;
            for _ in 0..attempts {
                b.record();
                prop_assert!(b.count() >= prev);
                prop_assert!(b.count() <= b.limit());
                prev = b.count();
            }
            prop_assert_eq!(b.count(), (attempts as u32).min(limit));
            prop_assert_eq!(b.remaining(), limit - b.count());
        }
    }
}
