use std::time::Duration;

/// Result of a successful reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; nothing to do until the next change
    Done,
    /// Waiting on an asynchronous provider transition; try again after the delay
    Requeue(Duration),
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }

    /// Combine two outcomes, keeping the earliest requeue
    pub fn merge(self, other: Outcome) -> Outcome {
        match (self, other) {
            (Outcome::Done, o) | (o, Outcome::Done) => o,
            (Outcome::Requeue(a), Outcome::Requeue(b)) => Outcome::Requeue(a.min(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_earliest_requeue() {
        let ten = Outcome::Requeue(Duration::from_secs(10));
        let thirty = Outcome::Requeue(Duration::from_secs(30));
        assert_eq!(Outcome::Done.merge(Outcome::Done), Outcome::Done);
        assert_eq!(Outcome::Done.merge(thirty), thirty);
        assert_eq!(thirty.merge(ten), ten);
    }
}
