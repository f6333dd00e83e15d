//! Intermediate JSON stage artifacts, one file per (channel,
//! representation) plus one per channel for the normalized segments.
//! Treated as a write-through cache: extraction writes every artifact,
//! readers fall back to "no data" on anything malformed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::features::histogram::{Histogram, Representation};
use crate::features::segment::Segment;
use crate::features::{ChannelFeatures, SongFeatures};

fn histogram_path(dir: &Path, channel: u8, repr: Representation) -> PathBuf {
    dir.join(format!("{}_channel_{}.json", repr.label(), channel))
}

fn segments_path(dir: &Path, channel: u8) -> PathBuf {
    dir.join(format!("segments_channel_{}.json", channel))
}

/// Write one channel's artifacts: the normalized-segment map and the
/// three histogram maps, song filename → per-segment arrays.
pub fn write_channel(dir: &Path, features: &ChannelFeatures) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;

    let segments: BTreeMap<&String, &Vec<Segment>> = features
        .songs
        .iter()
        .map(|(name, song)| (name, &song.segments))
        .collect();
    write_json(&segments_path(dir, features.channel), &segments)?;

    for repr in Representation::ALL {
        let histograms: BTreeMap<&String, &[Histogram]> = features
            .songs
            .iter()
            .map(|(name, song)| (name, song.histograms(repr)))
            .collect();
        write_json(&histogram_path(dir, features.channel, repr), &histograms)?;
    }

    Ok(())
}

/// Read one channel's artifacts back into feature form. Returns `None`
/// if any artifact is missing, unreadable, or inconsistent — the caller
/// recomputes from the MIDI files in that case.
pub fn read_channel(dir: &Path, channel: u8) -> Option<BTreeMap<String, SongFeatures>> {
    let mut segments: BTreeMap<String, Vec<Segment>> =
        read_json(&segments_path(dir, channel))?;
    let mut atb: BTreeMap<String, Vec<Histogram>> =
        read_json(&histogram_path(dir, channel, Representation::Atb))?;
    let mut rtb: BTreeMap<String, Vec<Histogram>> =
        read_json(&histogram_path(dir, channel, Representation::Rtb))?;
    let mut ftb: BTreeMap<String, Vec<Histogram>> =
        read_json(&histogram_path(dir, channel, Representation::Ftb))?;

    let mut songs = BTreeMap::new();
    let names: Vec<String> = segments.keys().cloned().collect();
    for name in names {
        let (Some(segments), Some(atb), Some(rtb), Some(ftb)) = (
            segments.remove(&name),
            atb.remove(&name),
            rtb.remove(&name),
            ftb.remove(&name),
        ) else {
            log::warn!(
                "Artifacts for channel {} disagree on song {}, ignoring cache",
                channel,
                name
            );
            return None;
        };
        songs.insert(
            name,
            SongFeatures {
                segments,
                atb,
                rtb,
                ftb,
            },
        );
    }
    Some(songs)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value).map_err(io::Error::from)
}

/// Missing artifact → `None` quietly; present-but-malformed artifact →
/// `None` with a warning. Never an error.
fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        log::debug!("No artifact at {}", path.display());
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("Failed to read {}: {}. Treating as no data.", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Failed to parse {}: {}. Treating as no data.", path.display(), e);
            None
        }
    }
}
