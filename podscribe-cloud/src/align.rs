//! Speaker alignment

use podscribe_core::domain::transcript::{SpeakerTurn, TranscriptSegment};

/// Labels each segment with the speaker whose turn overlaps it the most
///
/// Ties go to the earlier turn. A segment no turn overlaps keeps `None`.
pub fn assign_speakers(segments: &mut [TranscriptSegment], turns: &[SpeakerTurn]) {
    for segment in segments.iter_mut() {
        let mut best: Option<(&SpeakerTurn, f64)> = None;

        for turn in turns {
            let overlap = turn.overlap(segment.start, segment.end);
            if overlap <= 0.0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, amount)) => {
                    overlap > amount || (overlap == amount && turn.start < current.start)
                }
            };
            if better {
                best = Some((turn, overlap));
            }
        }

        segment.speaker = best.map(|(turn, _)| turn.speaker.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: String::new(),
            speaker: None,
        }
    }

    fn turn(start: f64, end: f64, speaker: &str) -> SpeakerTurn {
        SpeakerTurn {
            start,
            end,
            speaker: speaker.to_string(),
        }
    }

    #[test]
    fn test_largest_overlap_wins() {
        let mut segments = vec![segment(0.0, 4.0), segment(4.0, 9.0)];
        let turns = vec![turn(0.0, 3.0, "A"), turn(3.0, 10.0, "B")];

        assign_speakers(&mut segments, &turns);

        assert_eq!(segments[0].speaker.as_deref(), Some("A"));
        assert_eq!(segments[1].speaker.as_deref(), Some("B"));
    }

    #[test]
    fn test_tie_goes_to_earlier_turn() {
        let mut segments = vec![segment(2.0, 4.0)];
        let turns = vec![turn(3.0, 6.0, "late"), turn(0.0, 3.0, "early")];

        assign_speakers(&mut segments, &turns);

        assert_eq!(segments[0].speaker.as_deref(), Some("early"));
    }

    #[test]
    fn test_no_overlap_clears_label() {
        let mut segments = vec![TranscriptSegment {
            speaker: Some("stale".into()),
            ..segment(10.0, 12.0)
        }];

        assign_speakers(&mut segments, &[turn(0.0, 10.0, "A")]);

        assert_eq!(segments[0].speaker, None);
    }
}
