use serde::{Deserialize, Serialize};

/// One word-level timing inside a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    pub word: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One aligned segment of speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default)]
    pub words: Vec<Word>,
}

/// The engine-independent transcript shape persisted verbatim as
/// `result.json`. Every adapter's `ParseResult` produces one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub language: String,
    pub segments: Vec<Segment>,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptValidationError {
    #[error("segment {index} starts before the previous segment ({prev_start} > {start})")]
    SegmentsOutOfOrder {
        index: usize,
        prev_start: f64,
        start: f64,
    },
    #[error("word {word_index} in segment {segment_index} starts before the previous word ({prev_start} > {start})")]
    WordsOutOfOrder {
        segment_index: usize,
        word_index: usize,
        prev_start: f64,
        start: f64,
    },
}

impl Transcript {
    /// Validates the monotonicity invariants from §4.4: segments strictly
    /// non-decreasing by `start`, word timings strictly non-decreasing
    /// within a segment.
    pub fn validate(&self) -> Result<(), TranscriptValidationError> {
        let mut prev_start = f64::NEG_INFINITY;
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.start < prev_start {
                return Err(TranscriptValidationError::SegmentsOutOfOrder {
                    index,
                    prev_start,
                    start: segment.start,
                });
            }
            prev_start = segment.start;

            let mut prev_word_start = f64::NEG_INFINITY;
            for (word_index, word) in segment.words.iter().enumerate() {
                if word.start < prev_word_start {
                    return Err(TranscriptValidationError::WordsOutOfOrder {
                        segment_index: index,
                        word_index,
                        prev_start: prev_word_start,
                        start: word.start,
                    });
                }
                prev_word_start = word.start;
            }
        }
        Ok(())
    }

    /// Concatenation of this transcript's segment texts, space-separated.
    /// This is the building block the multi-track merge law in §8 is
    /// stated against.
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One per-track parse result going into the Multi-Track Coordinator's
/// merge step, tagged with the track's identity before merging.
pub struct TaggedTrack {
    pub track_index: u32,
    pub display_name: String,
    pub transcript: Transcript,
}

/// Implements the merge algorithm from §4.5: tag every segment with its
/// track's display name as `speaker`, sort by `start` ascending (ties by
/// track index, then by `end` ascending), and concatenate merged text with
/// a single space separator.
pub fn merge_tracks(tracks: Vec<TaggedTrack>, language: String) -> Transcript {
    let mut tagged: Vec<(u32, Segment)> = Vec::new();
    for track in tracks {
        for mut segment in track.transcript.segments {
            segment.speaker = Some(track.display_name.clone());
            tagged.push((track.track_index, segment));
        }
    }

    tagged.sort_by(|(idx_a, seg_a), (idx_b, seg_b)| {
        seg_a
            .start
            .partial_cmp(&seg_b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| idx_a.cmp(idx_b))
            .then_with(|| seg_a.end.partial_cmp(&seg_b.end).unwrap_or(std::cmp::Ordering::Equal))
    });

    let segments: Vec<Segment> = tagged.into_iter().map(|(_, seg)| seg).collect();
    let text = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    Transcript {
        language,
        segments,
        text,
    }
}
