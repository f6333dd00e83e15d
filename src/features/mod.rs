pub mod histogram;
pub mod segment;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::extractor::{self, ExtractError};
use crate::features::histogram::{Histogram, Representation};
use crate::features::segment::{normalized_segments, Segment};
use crate::MIDI_EXTENSIONS;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Corpus folder not found: {0}")]
    CorpusFolder(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI extraction error: {0}")]
    Extract(#[from] ExtractError),
}

/// All features for one (song, channel): the normalized segments plus
/// one histogram per segment per representation, order-preserving with
/// the segmenter's output.
#[derive(Debug, Clone, PartialEq)]
pub struct SongFeatures {
    pub segments: Vec<Segment>,
    pub atb: Vec<Histogram>,
    pub rtb: Vec<Histogram>,
    pub ftb: Vec<Histogram>,
}

impl SongFeatures {
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let build = |repr: Representation| segments.iter().map(|s| repr.build(s)).collect();
        Self {
            atb: build(Representation::Atb),
            rtb: build(Representation::Rtb),
            ftb: build(Representation::Ftb),
            segments,
        }
    }

    pub fn histograms(&self, repr: Representation) -> &[Histogram] {
        match repr {
            Representation::Atb => &self.atb,
            Representation::Rtb => &self.rtb,
            Representation::Ftb => &self.ftb,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// One channel's slice of the corpus: song filename → features.
/// `BTreeMap` keeps iteration in filename order, so "first encountered"
/// is stable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelFeatures {
    pub channel: u8,
    pub songs: BTreeMap<String, SongFeatures>,
}

/// Feature sets for a whole corpus, one entry per configured channel.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    pub channels: Vec<ChannelFeatures>,
    pub files_scanned: usize,
    pub files_failed: usize,
}

impl FeatureIndex {
    pub fn channel(&self, channel: u8) -> Option<&ChannelFeatures> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    /// Unique songs that produced data on at least one channel.
    pub fn song_count(&self) -> usize {
        let mut names: Vec<&str> = self
            .channels
            .iter()
            .flat_map(|c| c.songs.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    pub fn segment_count(&self) -> usize {
        self.channels
            .iter()
            .flat_map(|c| c.songs.values())
            .map(SongFeatures::segment_count)
            .sum()
    }
}

/// Compute every configured channel's features for one parsed file.
/// Channels with no data are omitted. Shared by the corpus path and the
/// query path — the two sides differ only in how errors are handled.
pub fn smf_features(smf: &midly::Smf, config: &PipelineConfig) -> Vec<(u8, SongFeatures)> {
    config
        .channels
        .iter()
        .filter_map(|&channel| {
            extractor::channel_notes(smf, channel, config.timing).map(|notes| {
                let segments = normalized_segments(&notes, config);
                (channel, SongFeatures::from_segments(segments))
            })
        })
        .collect()
}

/// Parse one MIDI file and compute its per-channel features.
pub fn file_features(
    path: &Path,
    config: &PipelineConfig,
) -> Result<Vec<(u8, SongFeatures)>, ExtractError> {
    let data = std::fs::read(path)?;
    let smf = midly::Smf::parse(&data)?;
    Ok(smf_features(&smf, config))
}

/// Collect MIDI files under a corpus folder, sorted by path so the
/// processing order (and therefore tie-breaking) is deterministic.
pub fn collect_midi_files(folder: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !folder.is_dir() {
        return Err(PipelineError::CorpusFolder(folder.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if MIDI_EXTENSIONS.contains(&ext.as_str()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Extract per-channel, per-representation feature sets for every
/// readable MIDI file in the corpus folder.
///
/// Files run in parallel on a rayon pool; each (song, channel) result is
/// an immutable value merged into the index once complete. Corrupted or
/// unreadable files are skipped with a warning — failure isolation is at
/// file granularity, the batch never aborts for one bad file.
pub fn extract_features(
    corpus_folder: &Path,
    config: &PipelineConfig,
    workers: usize,
) -> Result<FeatureIndex, PipelineError> {
    let files = collect_midi_files(corpus_folder)?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Extracting...");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .unwrap();

    let results: Vec<(String, Result<Vec<(u8, SongFeatures)>, ExtractError>)> =
        pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let name = path
                        .file_name()
                        .map(|f| f.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let result = file_features(path, config);
                    pb.inc(1);
                    (name, result)
                })
                .collect()
        });

    let mut index = FeatureIndex {
        channels: config
            .channels
            .iter()
            .map(|&channel| ChannelFeatures {
                channel,
                songs: BTreeMap::new(),
            })
            .collect(),
        files_scanned: 0,
        files_failed: 0,
    };

    for (name, result) in results {
        index.files_scanned += 1;
        match result {
            Ok(per_channel) => {
                for (channel, features) in per_channel {
                    if let Some(cf) = index.channels.iter_mut().find(|c| c.channel == channel) {
                        cf.songs.insert(name.clone(), features);
                    }
                }
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", name, e);
                index.files_failed += 1;
            }
        }
    }

    pb.finish_with_message(format!(
        "Done: {} files, {} skipped",
        index.files_scanned, index.files_failed
    ));

    Ok(index)
}

/// Load corpus features from the artifact cache if every channel reads
/// back cleanly; otherwise recompute from the MIDI files and write the
/// artifacts through.
pub fn load_or_extract(
    corpus_folder: &Path,
    config: &PipelineConfig,
    workers: usize,
    cache_dir: Option<&Path>,
) -> Result<FeatureIndex, PipelineError> {
    let dir = match cache_dir {
        Some(dir) => dir,
        None => return extract_features(corpus_folder, config, workers),
    };

    let mut channels = Vec::with_capacity(config.channels.len());
    for &channel in &config.channels {
        match crate::cache::read_channel(dir, channel) {
            Some(songs) => channels.push(ChannelFeatures { channel, songs }),
            None => {
                channels.clear();
                break;
            }
        }
    }
    if !channels.is_empty() {
        log::info!("Loaded corpus features from {}", dir.display());
        return Ok(FeatureIndex {
            channels,
            files_scanned: 0,
            files_failed: 0,
        });
    }

    let index = extract_features(corpus_folder, config, workers)?;
    for cf in &index.channels {
        if let Err(e) = crate::cache::write_channel(dir, cf) {
            log::warn!("Failed to write artifacts for channel {}: {}", cf.channel, e);
        }
    }
    Ok(index)
}
