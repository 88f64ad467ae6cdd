//! Global step budget of one turn
//!
//! One step is consumed per router evaluation and per generation call.
//! Capability executions ride on the generation step that requested them,
//! and provider retries happen inside a single step.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    limit: u32,
    used: u32,
}

impl StepBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Take one step; false when the ceiling is already reached
    pub fn consume(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.limit - self.used
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_until_ceiling() {
        let mut budget = StepBudget::new(2);
        assert!(budget.consume());
        assert_eq!(budget.remaining(), 1);
        assert!(budget.consume());
        assert_eq!(budget.remaining(), 0);
        assert!(!budget.consume());
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn test_zero_budget() {
        let mut budget = StepBudget::new(0);
        assert_eq!(budget.remaining(), 0);
        assert!(!budget.consume());
        assert_eq!(budget.used(), 0);
    }
}
