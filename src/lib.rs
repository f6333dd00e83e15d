pub mod cache;
pub mod config;
pub mod engine;
pub mod extractor;
pub mod features;

/// MIDI file extensions we accept when walking a corpus folder
pub const MIDI_EXTENSIONS: &[&str] = &["mid", "midi"];

/// Application name for XDG paths
pub const APP_NAME: &str = "humdex";
