//! Broken-create tracking
//!
//! After a failed `create` the pool lets at most one creation attempt run at a
//! time; concurrent attempts fail fast until a creation succeeds again.

/// Creation state of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateState {
    /// The last creation succeeded (or none was attempted)
    Healthy,

    /// The last creation failed
    Broken,
}

/// Tracks consecutive creation failures; lives inside the pool's locked state
#[derive(Debug)]
pub(crate) struct CreateBreaker {
    state: CreateState,
    consecutive_failures: usize,
}

impl CreateBreaker {
    pub fn new() -> Self {
        Self {
            state: CreateState::Healthy,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> CreateState {
        self.state
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    /// Whether a new creation attempt must be refused while `creating` others are in flight
    pub fn should_short_circuit(&self, creating: usize) -> bool {
        self.state == CreateState::Broken && creating > 0
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.state = CreateState::Broken;
    }

    pub fn record_success(&mut self) {
        self.state = CreateState::Healthy;
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_never_short_circuits() {
        let breaker = CreateBreaker::new();
        assert_eq!(breaker.state(), CreateState::Healthy);
        assert!(!breaker.should_short_circuit(5));
    }

    #[test]
    fn broken_short_circuits_only_with_creation_in_flight() {
        let mut breaker = CreateBreaker::new();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.consecutive_failures(), 2);
        assert!(breaker.should_short_circuit(1));
        assert!(!breaker.should_short_circuit(0));
    }

    #[test]
    fn success_clears_broken_state() {
        let mut breaker = CreateBreaker::new();
        breaker.record_failure();
        breaker.record_success();

        assert_eq!(breaker.state(), CreateState::Healthy);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.should_short_circuit(3));
    }
}
