use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::{FusionWeights, PipelineConfig};
use crate::features::histogram::Histogram;
use crate::features::{self, ChannelFeatures, PipelineError, SongFeatures};

/// Final retrieval outcome: the best-matching corpus filename and its
/// confidence, or the null/0 sentinel when no song had any data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub song: Option<String>,
    pub similarity_percentage: f64,
}

/// Run the whole pipeline: extract the query's features, score it
/// against every corpus song per channel, then fuse and aggregate into
/// the single best match.
///
/// Corpus feature extraction parallelizes per file and scoring per
/// reference song; the cross-channel average only runs once every
/// channel's scores are collected.
pub fn run_query(
    query_file: &Path,
    corpus_folder: &Path,
    config: &PipelineConfig,
    workers: usize,
    cache_dir: Option<&Path>,
) -> Result<QueryResult, PipelineError> {
    let corpus = features::load_or_extract(corpus_folder, config, workers, cache_dir)?;

    // Query-side failures are fatal, unlike corpus files
    let query: BTreeMap<u8, SongFeatures> = features::file_features(query_file, config)?
        .into_iter()
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .unwrap();

    let per_channel: Vec<BTreeMap<String, Vec<f64>>> = pool.install(|| {
        corpus
            .channels
            .iter()
            .filter_map(|cf| {
                // A channel where the query itself is silent contributes nothing
                let qf = query.get(&cf.channel)?;
                if cf.songs.is_empty() {
                    log::debug!("No corpus data for channel {}", cf.channel);
                    return None;
                }
                Some(channel_similarities(qf, cf, &config.weights))
            })
            .collect()
    });

    Ok(best_match(&per_channel))
}

/// Score one channel: for every reference song, the fused similarity
/// series indexed by query segment.
///
/// Each query segment takes its maximum cosine similarity over all of
/// the reference song's segments ("best local match" — tolerant of
/// tempo and alignment drift), per representation, then the three
/// representations fuse with the fixed weights.
pub fn channel_similarities(
    query: &SongFeatures,
    channel: &ChannelFeatures,
    weights: &FusionWeights,
) -> BTreeMap<String, Vec<f64>> {
    channel
        .songs
        .par_iter()
        .map(|(name, song)| {
            let series: Vec<f64> = (0..query.segment_count())
                .map(|i| {
                    let atb = best_local_match(&query.atb[i], &song.atb);
                    let rtb = best_local_match(&query.rtb[i], &song.rtb);
                    let ftb = best_local_match(&query.ftb[i], &song.ftb);
                    weights.atb * atb + weights.rtb * rtb + weights.ftb * ftb
                })
                .collect();
            (name.clone(), series)
        })
        .collect()
}

/// Collapse per-channel similarity series into the best song.
///
/// Per (channel, song): arithmetic mean of the series, 0 for an empty
/// series but still counted for that channel. Per song: average over
/// only the channels where the song produced data — a missing channel
/// shrinks the denominator instead of dragging the average to 0. Ties
/// keep the first song in iteration order.
pub fn best_match(per_channel: &[BTreeMap<String, Vec<f64>>]) -> QueryResult {
    let mut totals: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for channel in per_channel {
        for (song, series) in channel {
            let avg = if series.is_empty() {
                0.0
            } else {
                series.iter().sum::<f64>() / series.len() as f64
            };
            let entry = totals.entry(song.as_str()).or_insert((0.0, 0));
            entry.0 += avg;
            entry.1 += 1;
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for (song, (sum, count)) in &totals {
        let avg = *sum / *count as f64;
        let better = match best {
            None => true,
            // strictly greater, so the first-encountered song wins ties
            Some((_, best_avg)) => avg > best_avg,
        };
        if better {
            best = Some((song, avg));
        }
    }

    match best {
        Some((song, avg)) => QueryResult {
            song: Some(song.to_string()),
            similarity_percentage: (avg * 100.0 * 100.0).round() / 100.0,
        },
        None => QueryResult {
            song: None,
            similarity_percentage: 0.0,
        },
    }
}

/// Maximum cosine similarity of one query histogram over all of a
/// reference song's segment histograms.
fn best_local_match(query: &Histogram, reference: &[Histogram]) -> f64 {
    reference
        .iter()
        .map(|hist| cosine_similarity(query, hist))
        .fold(0.0, f64::max)
}

/// Cosine similarity between two histograms.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u28, u4, u7};
    use midly::{Format, Header, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
    use std::path::PathBuf;

    #[test]
    fn test_cosine_identical() {
        let a = vec![0.25, 0.5, 0.25];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-10);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![0.5, 0.5];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    fn song(atb: Vec<Histogram>, rtb: Vec<Histogram>, ftb: Vec<Histogram>) -> SongFeatures {
        SongFeatures {
            segments: vec![Vec::new(); atb.len()],
            atb,
            rtb,
            ftb,
        }
    }

    #[test]
    fn test_weighted_fusion_elementwise() {
        let query = song(
            vec![vec![1.0, 0.0]],
            vec![vec![0.0, 1.0]],
            vec![vec![1.0, 1.0]],
        );
        let reference = song(
            vec![vec![1.0, 0.0]], // atb sim = 1.0
            vec![vec![1.0, 0.0]], // rtb sim = 0.0
            vec![vec![1.0, 0.0]], // ftb sim = 1/sqrt(2)
        );
        let mut songs = BTreeMap::new();
        songs.insert("ref.mid".to_string(), reference);
        let channel = ChannelFeatures { channel: 0, songs };

        let results = channel_similarities(&query, &channel, &FusionWeights::default());
        let series = &results["ref.mid"];
        assert_eq!(series.len(), 1);
        let expected = 0.15 * 1.0 + 0.60 * 0.0 + 0.25 * (1.0 / 2.0_f64.sqrt());
        assert!((series[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_best_local_match_takes_max_over_reference_segments() {
        let query = song(
            vec![vec![1.0, 0.0]],
            vec![vec![1.0, 0.0]],
            vec![vec![1.0, 0.0]],
        );
        // Second reference segment matches exactly; max wins over the miss
        let reference = song(
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
        );
        let mut songs = BTreeMap::new();
        songs.insert("ref.mid".to_string(), reference);
        let channel = ChannelFeatures { channel: 0, songs };

        let results = channel_similarities(&query, &channel, &FusionWeights::default());
        assert!((results["ref.mid"][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_best_match_higher_mean_wins() {
        let mut ch = BTreeMap::new();
        ch.insert("a.mid".to_string(), vec![0.9, 0.7, 0.8]);
        ch.insert("b.mid".to_string(), vec![0.5, 0.6, 0.4]);
        let result = best_match(&[ch]);
        assert_eq!(result.song.as_deref(), Some("a.mid"));
        assert!((result.similarity_percentage - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_match_tie_keeps_first() {
        let mut ch = BTreeMap::new();
        ch.insert("a.mid".to_string(), vec![0.5, 0.5]);
        ch.insert("b.mid".to_string(), vec![0.5, 0.5]);
        let result = best_match(&[ch]);
        assert_eq!(result.song.as_deref(), Some("a.mid"));
    }

    #[test]
    fn test_best_match_missing_channel_shrinks_denominator() {
        // Song a: channels 0 and 1, averages 0.8 and 0.4 → 0.6.
        // Song b: channel 0 only, average 0.9 → 0.9, not 0.45.
        let mut ch0 = BTreeMap::new();
        ch0.insert("a.mid".to_string(), vec![0.8]);
        ch0.insert("b.mid".to_string(), vec![0.9]);
        let mut ch1 = BTreeMap::new();
        ch1.insert("a.mid".to_string(), vec![0.4]);

        let result = best_match(&[ch0, ch1]);
        assert_eq!(result.song.as_deref(), Some("b.mid"));
        assert!((result.similarity_percentage - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_match_empty_series_counts_as_zero() {
        let mut ch0 = BTreeMap::new();
        ch0.insert("a.mid".to_string(), vec![0.8]);
        let mut ch1 = BTreeMap::new();
        ch1.insert("a.mid".to_string(), Vec::new());

        let result = best_match(&[ch0, ch1]);
        // (0.8 + 0.0) / 2 channels
        assert!((result.similarity_percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_match_no_data_sentinel() {
        let result = best_match(&[]);
        assert_eq!(result.song, None);
        assert_eq!(result.similarity_percentage, 0.0);
    }

    fn save_smf(path: &PathBuf, channel: u8, pitches: &[u8]) {
        let events = pitches
            .iter()
            .map(|&p| TrackEvent {
                delta: u28::new(120),
                kind: TrackEventKind::Midi {
                    channel: u4::new(channel),
                    message: MidiMessage::NoteOn {
                        key: u7::new(p),
                        vel: u7::new(64),
                    },
                },
            })
            .collect();
        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480))),
            tracks: vec![events],
        };
        smf.save(path).unwrap();
    }

    #[test]
    fn test_run_query_end_to_end() {
        let dir = std::env::temp_dir().join(format!("humdex_query_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();

        let melody = [60u8, 62, 64, 65, 67, 69, 71, 72, 74, 76];
        let other = [40u8, 52, 41, 53, 40, 55, 42, 50, 43, 57];
        save_smf(&dir.join("target.mid"), 0, &melody);
        save_smf(&dir.join("other.mid"), 0, &other);

        let query_path = std::env::temp_dir().join(format!("humdex_q_{}.mid", std::process::id()));
        save_smf(&query_path, 0, &melody);

        let result = run_query(&query_path, &dir, &PipelineConfig::default(), 1, None).unwrap();
        assert_eq!(result.song.as_deref(), Some("target.mid"));
        // Identical melody: every representation matches exactly
        assert!((result.similarity_percentage - 100.0).abs() < 1e-9);

        std::fs::remove_dir_all(&dir).ok();
        std::fs::remove_file(&query_path).ok();
    }

    #[test]
    fn test_run_query_empty_corpus_sentinel() {
        let dir = std::env::temp_dir().join(format!("humdex_empty_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();

        let query_path = std::env::temp_dir().join(format!("humdex_eq_{}.mid", std::process::id()));
        save_smf(&query_path, 0, &[60, 64, 67]);

        let result = run_query(&query_path, &dir, &PipelineConfig::default(), 1, None).unwrap();
        assert_eq!(result.song, None);
        assert_eq!(result.similarity_percentage, 0.0);

        std::fs::remove_dir_all(&dir).ok();
        std::fs::remove_file(&query_path).ok();
    }
}
