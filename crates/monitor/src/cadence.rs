//! Adaptive health-check cadence (spec §4.8, property 8): two fixed
//! intervals, `Fast` and `Slow`, with a pure state machine deciding which
//! one applies to the *next* tick. Kept free of any real timer so property
//! 8 is testable without `tokio::time::pause`/`advance`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Copy)]
pub struct CadenceConfig {
    pub fast: Duration,
    pub slow: Duration,
    pub stable_threshold: u32,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(30),
            slow: Duration::from_secs(300),
            stable_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CadenceState {
    config: CadenceConfig,
    current: Cadence,
    consecutive_successes: u32,
}

impl CadenceState {
    pub fn new(config: CadenceConfig) -> Self {
        Self { config, current: Cadence::Fast, consecutive_successes: 0 }
    }

    pub fn current(&self) -> Cadence {
        self.current
    }

    pub fn interval(&self) -> Duration {
        match self.current {
            Cadence::Fast => self.config.fast,
            Cadence::Slow => self.config.slow,
        }
    }

    /// Records a successful probe, switching to `Slow` once
    /// `stable_threshold` consecutive successes have landed at `Fast`.
    pub fn record_success(&mut self) {
        if self.current == Cadence::Slow {
            return;
        }
        self.consecutive_successes += 1;
        if self.consecutive_successes >= self.config.stable_threshold {
            self.current = Cadence::Slow;
            self.consecutive_successes = 0;
        }
    }

    /// Any failure resets to `Fast` immediately.
    pub fn record_failure(&mut self) {
        self.current = Cadence::Fast;
        self.consecutive_successes = 0;
    }

    /// `checkBackendShouldSwitch()` forces an out-of-band re-evaluation;
    /// modeled as an immediate reset to `Fast` the same as a failure.
    pub fn force_fast(&mut self) {
        self.current = Cadence::Fast;
        self.consecutive_successes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CadenceConfig {
        CadenceConfig { fast: Duration::from_secs(30), slow: Duration::from_secs(300), stable_threshold: threshold }
    }

    // Property 8 — after STABLE_THRESHOLD consecutive successes at FAST,
    // the next probe is at SLOW; the next failure resets to FAST.
    #[test]
    fn switches_to_slow_after_stable_threshold_successes() {
        let mut state = CadenceState::new(config(3));
        assert_eq!(state.current(), Cadence::Fast);
        state.record_success();
        state.record_success();
        assert_eq!(state.current(), Cadence::Fast);
        state.record_success();
        assert_eq!(state.current(), Cadence::Slow);
    }

    #[test]
    fn failure_resets_to_fast_from_slow() {
        let mut state = CadenceState::new(config(1));
        state.record_success();
        assert_eq!(state.current(), Cadence::Slow);
        state.record_failure();
        assert_eq!(state.current(), Cadence::Fast);
    }

    #[test]
    fn force_fast_resets_counter_and_cadence() {
        let mut state = CadenceState::new(config(2));
        state.record_success();
        state.force_fast();
        assert_eq!(state.current(), Cadence::Fast);
        state.record_success();
        assert_eq!(state.current(), Cadence::Fast);
        state.record_success();
        assert_eq!(state.current(), Cadence::Slow);
    }

    #[test]
    fn interval_matches_configured_durations() {
        let mut state = CadenceState::new(config(1));
        assert_eq!(state.interval(), Duration::from_secs(30));
        state.record_success();
        assert_eq!(state.interval(), Duration::from_secs(300));
    }
}
