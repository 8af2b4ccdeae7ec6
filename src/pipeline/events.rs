//! Output protocol of one pipeline run.
//!
//! [`ProgressEvent`] is the only type that leaves the pipeline. Each event
//! updates exactly one field of the caller's in-progress answer: timings are
//! appended, fragments are appended in backend order, and a terminal event
//! (`Completed` or `Failed`) makes the answer read-only.

use std::fmt;

use answerflow_search::{ImageResult, SourceRecord, VideoResult};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::interpreter::Intent;
use crate::ranker::RankedResult;

/// Stream of progress events for one request.
pub type ProgressStream = ReceiverStream<ProgressEvent>;

/// Timing milestones reported while a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    /// The intent call returned.
    IntentParsed,
    /// All three retrieval branches settled.
    Retrieved,
    /// The ranked answer was parsed.
    Ranked,
    /// Whole request.
    Total,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IntentParsed => "intent_parsed",
            Self::Retrieved => "retrieved",
            Self::Ranked => "ranked",
            Self::Total => "total",
        };
        f.write_str(name)
    }
}

/// One unit of the streamed output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Elapsed time since the request started.
    Timing {
        /// Which stage finished.
        milestone: Milestone,
        /// Milliseconds since the request started.
        elapsed_ms: u64,
    },
    /// Interpreted query.
    Intent {
        /// The parsed intent.
        intent: Intent,
    },
    /// Web sources that will be ranked.
    Sources {
        /// Sources in provider order.
        sources: Vec<SourceRecord>,
    },
    /// Validated image results.
    Images {
        /// Images in provider order.
        images: Vec<ImageResult>,
    },
    /// Validated video results.
    Videos {
        /// Videos in provider order.
        videos: Vec<VideoResult>,
    },
    /// Raw fragment of the ranked-answer text.
    Fragment {
        /// Text exactly as the backend produced it.
        text: String,
    },
    /// No more fragments follow.
    AnswerEnd,
    /// Parsed ranking.
    Ranked {
        /// Results with dense positions.
        results: Vec<RankedResult>,
    },
    /// The request finished successfully.
    Completed,
    /// The request ended early.
    Failed {
        /// Stable error code.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl ProgressEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let timing = ProgressEvent::Timing {
            milestone: Milestone::IntentParsed,
            elapsed_ms: 12,
        };
        let json = serde_json::to_value(&timing).expect("serialize");
        assert_eq!(json["type"], "timing");
        assert_eq!(json["milestone"], "intent_parsed");
        assert_eq!(json["elapsed_ms"], 12);

        let json = serde_json::to_value(ProgressEvent::AnswerEnd).expect("serialize");
        assert_eq!(json, serde_json::json!({"type": "answer_end"}));
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(ProgressEvent::Completed.is_terminal());
        assert!(
            ProgressEvent::Failed {
                code: "PARSE_ERROR".into(),
                message: "bad".into(),
            }
            .is_terminal()
        );
        assert!(!ProgressEvent::AnswerEnd.is_terminal());
        assert!(!ProgressEvent::Fragment { text: "x".into() }.is_terminal());
    }
}
