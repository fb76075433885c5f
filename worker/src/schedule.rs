/// The step length of every round, decaying geometrically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSchedule {
    initial: f32,
    decay: f32,
}

impl StepSchedule {
    pub fn new(initial: f32, decay: f32) -> Self {
        Self { initial, decay }
    }

    /// Returns the step length of the zero based `round`.
    #[inline]
    pub fn step(&self, round: usize) -> f32 {
        let exp = i32::try_from(round).unwrap_or(i32::MAX);
        self.initial * self.decay.powi(exp)
    }
}

impl Default for StepSchedule {
    fn default() -> Self {
        Self::new(1., 0.9)
    }
}

/// Defines when to evaluate the factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalSchedule {
    every: usize,
    rounds: usize,
}

impl EvalSchedule {
    /// Creates a new `EvalSchedule`.
    ///
    /// # Arguments
    /// * `every` - Evaluate every this many rounds, `0` disables periodic evaluations.
    /// * `rounds` - The total amount of rounds.
    pub fn new(every: usize, rounds: usize) -> Self {
        Self { every, rounds }
    }

    pub fn is_periodic(&self) -> bool {
        self.every > 0
    }

    /// Returns true if the zero based `round` ends an evaluation window.
    #[inline]
    pub fn after_round(&self, round: usize) -> bool {
        self.is_periodic() && (round + 1) % self.every == 0
    }

    /// Returns true if the last round didn't already evaluate.
    pub fn at_end(&self) -> bool {
        !self.is_periodic() || self.rounds % self.every != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_decays_geometrically() {
        let s = StepSchedule::default();

        assert_eq!(s.step(0), 1.);
        assert!((s.step(1) - 0.9).abs() < 1e-6);
        assert!((s.step(3) - 0.729).abs() < 1e-6);
        assert!(s.step(1) < s.step(0));
    }

    #[test]
    fn periodic_evaluation() {
        let s = EvalSchedule::new(3, 7);
        let evaluated: Vec<_> = (0..7).filter(|r| s.after_round(*r)).collect();

        assert_eq!(evaluated, vec![2, 5]);
        assert!(s.at_end());
    }

    #[test]
    fn last_round_on_boundary() {
        let s = EvalSchedule::new(2, 4);

        assert!(s.after_round(3));
        assert!(!s.at_end());
    }

    #[test]
    fn disabled_evaluation_only_runs_at_the_end() {
        let s = EvalSchedule::new(0, 5);

        assert!((0..5).all(|r| !s.after_round(r)));
        assert!(s.at_end());
    }
}
