use crate::config::PipelineConfig;
use crate::extractor::NoteEvent;

/// A window of consecutive notes from one song/channel. Always
/// `segment_length` notes except for the trailing remainder.
pub type Segment = Vec<NoteEvent>;

/// Which field of a [`NoteEvent`] a normalization pass applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKey {
    Pitch,
    Timing,
}

impl FeatureKey {
    fn get(self, note: &NoteEvent) -> f64 {
        match self {
            Self::Pitch => note.pitch as f64,
            Self::Timing => note.timing as f64,
        }
    }

    fn set(self, note: &mut NoteEvent, value: f64) {
        match self {
            Self::Pitch => note.pitch = value as u8,
            Self::Timing => note.timing = value as u64,
        }
    }
}

/// Slide a fixed-size overlapping window over the note sequence.
///
/// Emits full windows while they fit, advancing by `hop` each time; any
/// unconsumed tail becomes one final shorter segment that is not
/// windowed further. Segments never skip notes and never span files or
/// channels.
pub fn windowed_segments(notes: &[NoteEvent], segment_length: usize, hop: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut i = 0;

    while i + segment_length <= notes.len() {
        segments.push(notes[i..i + segment_length].to_vec());
        i += hop;
    }
    if i < notes.len() {
        segments.push(notes[i..].to_vec());
    }

    segments
}

/// Z-score standardize one feature key over the segment, rescale so the
/// segment's own min maps to 0 and max to 127, round, clamp.
///
/// A zero-variance segment is returned unchanged for that key — callers
/// downstream must tolerate un-normalized values in this case. The
/// normalization is segment-local on purpose: it keeps melodic contour
/// and discards absolute register.
pub fn normalize_segment(segment: &[NoteEvent], key: FeatureKey) -> Segment {
    if segment.is_empty() {
        return Vec::new();
    }

    let values: Vec<f64> = segment.iter().map(|n| key.get(n)).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std = var.sqrt();

    if std == 0.0 {
        return segment.to_vec();
    }

    let z: Vec<f64> = values.iter().map(|v| (v - mean) / std).collect();
    let min = z.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    // std > 0 guarantees max > min
    let mut out = segment.to_vec();
    for (note, zv) in out.iter_mut().zip(&z) {
        let scaled = ((zv - min) * 127.0 / (max - min)).round().clamp(0.0, 127.0);
        key.set(note, scaled);
    }
    out
}

/// Window one channel's note sequence and normalize each segment:
/// pitch always, timing only when configured.
pub fn normalized_segments(notes: &[NoteEvent], config: &PipelineConfig) -> Vec<Segment> {
    windowed_segments(notes, config.segment_length, config.hop())
        .into_iter()
        .map(|segment| {
            let segment = normalize_segment(&segment, FeatureKey::Pitch);
            if config.normalize_timing {
                normalize_segment(&segment, FeatureKey::Timing)
            } else {
                segment
            }
        })
        .collect()
}
