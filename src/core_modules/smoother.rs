// THEORY:
// Classification is stateless, so a track near a decision boundary can flip
// between labels from one frame to the next. `LabelSmoother` is an opt-in
// majority vote over each track's last K fresh verdicts. The votes live on the
// track itself, so they die with it.

use crate::core_modules::classifier::{Classification, Label};
use std::collections::VecDeque;

/// Majority vote over a sliding window of per-track verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSmoother {
    window: usize,
}

impl LabelSmoother {
    /// A window of 0 or 1 disables smoothing.
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > 1
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Records `fresh` in `votes` and returns the smoothed verdict.
    ///
    /// The winner is the most frequent label; ties go to whichever tied label
    /// was seen most recently. Its confidence is the mean over its own votes.
    pub fn smooth(
        &self,
        votes: &mut VecDeque<(Label, f64)>,
        fresh: Classification,
    ) -> Classification {
        if !self.is_enabled() {
            return fresh;
        }

        votes.push_back((fresh.label, fresh.confidence));
        while votes.len() > self.window {
            votes.pop_front();
        }

        let count_of = |label: Label| votes.iter().filter(|(l, _)| *l == label).count();
        let best_count = votes.iter().map(|(l, _)| count_of(*l)).max().unwrap_or(0);
        let winner = votes
            .iter()
            .rev()
            .map(|(l, _)| *l)
            .find(|l| count_of(*l) == best_count)
            .unwrap_or(fresh.label);

        let (sum, n) = votes
            .iter()
            .filter(|(l, _)| *l == winner)
            .fold((0.0, 0usize), |(s, n), (_, c)| (s + c, n + 1));
        let confidence = if n > 0 { sum / n as f64 } else { fresh.confidence };
        Classification::new(winner, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(label: Label, confidence: f64) -> Classification {
        Classification::new(label, confidence)
    }

    #[test]
    fn disabled_smoother_passes_verdicts_through() {
        let smoother = LabelSmoother::new(1);
        let mut votes = VecDeque::new();
        let fresh = verdict(Label::Blinking, 0.4);
        assert_eq!(smoother.smooth(&mut votes, fresh), fresh);
        assert!(votes.is_empty());
    }

    #[test]
    fn single_flip_is_outvoted() {
        let smoother = LabelSmoother::new(5);
        let mut votes = VecDeque::new();
        for _ in 0..4 {
            smoother.smooth(&mut votes, verdict(Label::Blinking, 0.8));
        }
        let smoothed = smoother.smooth(&mut votes, verdict(Label::Analyzing, 0.0));
        assert_eq!(smoothed.label, Label::Blinking);
        assert!((smoothed.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn ties_favour_the_freshest_label() {
        let smoother = LabelSmoother::new(4);
        let mut votes = VecDeque::new();
        smoother.smooth(&mut votes, verdict(Label::Running, 1.0));
        smoother.smooth(&mut votes, verdict(Label::Running, 1.0));
        smoother.smooth(&mut votes, verdict(Label::Blinking, 0.5));
        let smoothed = smoother.smooth(&mut votes, verdict(Label::Blinking, 0.7));
        assert_eq!(smoothed.label, Label::Blinking);
        assert!((smoothed.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn window_bounds_the_vote_memory() {
        let smoother = LabelSmoother::new(3);
        let mut votes = VecDeque::new();
        for _ in 0..10 {
            smoother.smooth(&mut votes, verdict(Label::Running, 1.0));
        }
        assert_eq!(votes.len(), 3);
        for _ in 0..2 {
            smoother.smooth(&mut votes, verdict(Label::Blinking, 0.9));
        }
        assert_eq!(votes.len(), 3);
        assert_eq!(
            smoother.smooth(&mut votes, verdict(Label::Blinking, 0.9)).label,
            Label::Blinking
        );
    }
}
