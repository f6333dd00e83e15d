use crate::features::segment::Segment;

/// Fixed-length probability distribution: non-negative entries summing
/// to 1.0, or all-zero when the segment had nothing countable.
pub type Histogram = Vec<f64>;

/// Pitch intervals span -127..=+127.
const INTERVAL_BINS: usize = 255;

/// The three ways a segment's pitch content is encoded as a
/// distribution. See the glossary: absolute tones, consecutive
/// intervals, and intervals from the first note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    Atb,
    Rtb,
    Ftb,
}

impl Representation {
    pub const ALL: [Representation; 3] = [Self::Atb, Self::Rtb, Self::Ftb];

    pub fn label(self) -> &'static str {
        match self {
            Self::Atb => "atb",
            Self::Rtb => "rtb",
            Self::Ftb => "ftb",
        }
    }

    pub fn bins(self) -> usize {
        match self {
            Self::Atb => 128,
            Self::Rtb | Self::Ftb => INTERVAL_BINS,
        }
    }

    /// Build this representation's histogram for one normalized segment.
    pub fn build(self, segment: &Segment) -> Histogram {
        match self {
            Self::Atb => build_atb(segment),
            Self::Rtb => build_rtb(segment),
            Self::Ftb => build_ftb(segment),
        }
    }
}

/// Absolute Tone Based: one bin per MIDI pitch 0..=127.
fn build_atb(segment: &Segment) -> Histogram {
    let mut hist = vec![0.0; 128];
    for note in segment {
        hist[note.pitch.min(127) as usize] += 1.0;
    }
    count_normalize(hist, segment.len())
}

/// Relative Tone Based: consecutive-note intervals, bins -127..=+127.
fn build_rtb(segment: &Segment) -> Histogram {
    if segment.len() < 2 {
        return vec![0.0; INTERVAL_BINS];
    }
    let mut hist = vec![0.0; INTERVAL_BINS];
    for pair in segment.windows(2) {
        hist[interval_bin(pair[1].pitch, pair[0].pitch)] += 1.0;
    }
    count_normalize(hist, segment.len() - 1)
}

/// First Tone Based: each note's interval from the segment's first note.
fn build_ftb(segment: &Segment) -> Histogram {
    if segment.len() < 2 {
        return vec![0.0; INTERVAL_BINS];
    }
    let first = segment[0].pitch;
    let mut hist = vec![0.0; INTERVAL_BINS];
    for note in &segment[1..] {
        hist[interval_bin(note.pitch, first)] += 1.0;
    }
    count_normalize(hist, segment.len() - 1)
}

/// Map an interval to its bin index: -127 → 0, 0 → 127, +127 → 254.
fn interval_bin(to: u8, from: u8) -> usize {
    (to as i16 - from as i16 + 127) as usize
}

fn count_normalize(mut hist: Histogram, count: usize) -> Histogram {
    if count > 0 {
        for v in &mut hist {
            *v /= count as f64;
        }
    }
    hist
}
