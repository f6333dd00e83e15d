use std::path::Path;

use midly::{MidiMessage, Smf, TrackEventKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TimingMode;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI parse error: {0}")]
    Midi(#[from] midly::Error),
}

/// One note-on event on a single channel: MIDI pitch plus a tick count
/// whose meaning depends on the configured [`TimingMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub timing: u64,
}

/// Extract the ordered note sequence for one channel of a MIDI file.
///
/// Returns `Ok(None)` when the channel has no note-on events with
/// velocity > 0 — an empty or absent channel is not an error, callers
/// skip that song/channel combination.
pub fn extract_notes(
    path: &Path,
    channel: u8,
    timing: TimingMode,
) -> Result<Option<Vec<NoteEvent>>, ExtractError> {
    let data = std::fs::read(path)?;
    let smf = Smf::parse(&data)?;
    Ok(channel_notes(&smf, channel, timing))
}

/// Walk every track of a parsed SMF and collect note-ons for `target`.
///
/// The tick counter accumulates over all messages in flattened track
/// order; in delta mode each note's timing is measured from the previous
/// matching note on the same channel, not from the previous message of
/// any kind. Velocity-0 note-ons are note-offs in disguise and are
/// excluded.
pub fn channel_notes(smf: &Smf, target: u8, timing: TimingMode) -> Option<Vec<NoteEvent>> {
    let mut notes = Vec::new();
    let mut cumulative: u64 = 0;
    let mut last_note_tick: u64 = 0;

    for track in &smf.tracks {
        for event in track {
            cumulative += event.delta.as_int() as u64;
            if let TrackEventKind::Midi { channel, message } = event.kind {
                if channel.as_int() != target {
                    continue;
                }
                if let MidiMessage::NoteOn { key, vel } = message {
                    if vel.as_int() == 0 {
                        continue;
                    }
                    let tick = match timing {
                        TimingMode::Delta => {
                            let delta = cumulative - last_note_tick;
                            last_note_tick = cumulative;
                            delta
                        }
                        TimingMode::Absolute => cumulative,
                    };
                    notes.push(NoteEvent {
                        pitch: key.as_int(),
                        timing: tick,
                    });
                }
            }
        }
    }

    if notes.is_empty() {
        None
    } else {
        Some(notes)
    }
}
