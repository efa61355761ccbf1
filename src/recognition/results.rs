//! Result events from the continuous recognition engine
//!
//! The engine reports each utterance as a stream of interim deltas
//! followed by one authoritative completed transcript. `SegmentTracker`
//! folds that stream into result events carrying the full hypothesis
//! list plus the index of the first changed hypothesis, and
//! `ResultEvent::collapse` turns an event into display text.

/// A single recognition hypothesis for one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypothesis {
    pub text: String,
    /// Final hypotheses will not be revised further; interim ones may.
    pub is_final: bool,
}

impl Hypothesis {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn fin(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// One recognition result event: the full hypothesis list together
/// with the index of the first hypothesis that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEvent {
    pub start_index: usize,
    pub results: Vec<Hypothesis>,
}

impl ResultEvent {
    /// Collapse the event into display text.
    ///
    /// Scans all hypotheses from `start_index` forward, accumulating
    /// final and interim text separately. Final text wins when
    /// non-empty; otherwise the latest interim hypothesis is shown.
    pub fn collapse(&self) -> String {
        let mut interim = String::new();
        let mut finalized = String::new();

        for hypothesis in self.results.iter().skip(self.start_index) {
            if hypothesis.is_final {
                finalized.push_str(&hypothesis.text);
            } else {
                interim.push_str(&hypothesis.text);
            }
        }

        if finalized.is_empty() {
            interim
        } else {
            finalized
        }
    }
}

/// Folds transcript deltas and completions into result events.
///
/// Deltas extend the trailing interim hypothesis (starting a new one
/// after a completion); a completed transcript replaces the trailing
/// interim hypothesis with authoritative final text. The completed
/// text overrides accumulated deltas, which handles engines that send
/// corrections in the completion.
#[derive(Debug, Clone, Default)]
pub struct SegmentTracker {
    segments: Vec<Hypothesis>,
}

impl SegmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an interim transcript delta and return the result event.
    pub fn apply_delta(&mut self, delta: &str) -> ResultEvent {
        let index = match self.segments.last() {
            Some(segment) if !segment.is_final => self.segments.len() - 1,
            _ => {
                self.segments.push(Hypothesis::interim(""));
                self.segments.len() - 1
            }
        };

        self.segments[index].text.push_str(delta);

        ResultEvent {
            start_index: index,
            results: self.segments.clone(),
        }
    }

    /// Apply a completed transcript and return the result event.
    pub fn apply_completed(&mut self, transcript: &str) -> ResultEvent {
        let index = match self.segments.last_mut() {
            Some(segment) if !segment.is_final => {
                segment.text = transcript.to_string();
                segment.is_final = true;
                self.segments.len() - 1
            }
            _ => {
                self.segments.push(Hypothesis::fin(transcript));
                self.segments.len() - 1
            }
        };

        ResultEvent {
            start_index: index,
            results: self.segments.clone(),
        }
    }

    /// Number of tracked hypotheses.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Forget all tracked hypotheses.
    pub fn reset(&mut self) {
        self.segments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_then_final_collapses_to_the_final_transcript() {
        let event = ResultEvent {
            start_index: 0,
            results: vec![Hypothesis::fin("hello world")],
        };
        assert_eq!(event.collapse(), "hello world");
    }

    #[test]
    fn interim_only_tracks_the_latest_hypothesis() {
        // Two successive events for the same utterance: the collapse of
        // each event is that event's full hypothesis, not an
        // accumulation across events.
        let first = ResultEvent {
            start_index: 0,
            results: vec![Hypothesis::interim("hello")],
        };
        let second = ResultEvent {
            start_index: 0,
            results: vec![Hypothesis::interim("hello world")],
        };

        assert_eq!(first.collapse(), "hello");
        assert_eq!(second.collapse(), "hello world");
    }

    #[test]
    fn final_wins_over_interim_within_an_event() {
        let event = ResultEvent {
            start_index: 0,
            results: vec![Hypothesis::fin("hello world"), Hypothesis::interim("hel")],
        };
        assert_eq!(event.collapse(), "hello world");
    }

    #[test]
    fn collapse_skips_hypotheses_before_the_start_index() {
        let event = ResultEvent {
            start_index: 1,
            results: vec![Hypothesis::fin("first utterance"), Hypothesis::interim("second")],
        };
        assert_eq!(event.collapse(), "second");
    }

    #[test]
    fn tracker_deltas_extend_the_trailing_interim_segment() {
        let mut tracker = SegmentTracker::new();

        let event = tracker.apply_delta("hel");
        assert_eq!(event.start_index, 0);
        assert_eq!(event.collapse(), "hel");

        let event = tracker.apply_delta("lo");
        assert_eq!(event.start_index, 0);
        assert_eq!(event.collapse(), "hello");
    }

    #[test]
    fn tracker_completion_overrides_accumulated_deltas() {
        let mut tracker = SegmentTracker::new();
        tracker.apply_delta("helo");
        tracker.apply_delta(" wrld");

        let event = tracker.apply_completed("hello world");
        assert_eq!(event.start_index, 0);
        assert_eq!(event.collapse(), "hello world");
        assert!(event.results[0].is_final);
    }

    #[test]
    fn tracker_starts_a_new_segment_after_a_completion() {
        let mut tracker = SegmentTracker::new();
        tracker.apply_delta("first");
        tracker.apply_completed("first.");

        let event = tracker.apply_delta("second");
        assert_eq!(event.start_index, 1);
        assert_eq!(event.results.len(), 2);
        // The new utterance replaces the display text wholesale.
        assert_eq!(event.collapse(), "second");
    }

    #[test]
    fn tracker_completion_without_deltas_creates_a_final_segment() {
        let mut tracker = SegmentTracker::new();
        let event = tracker.apply_completed("direct completion");

        assert_eq!(event.start_index, 0);
        assert_eq!(event.collapse(), "direct completion");
    }

    #[test]
    fn tracker_reset_forgets_everything() {
        let mut tracker = SegmentTracker::new();
        tracker.apply_delta("text");
        tracker.apply_completed("text");

        tracker.reset();

        assert!(tracker.is_empty());
        let event = tracker.apply_delta("fresh");
        assert_eq!(event.start_index, 0);
    }
}
