use std::path::{Path, PathBuf};

/// User-facing sound ids and the resource each one plays.
const SOUND_TABLE: &[(&str, &str)] = &[
    ("classic", "alarm_classic"),
    ("radar", "radar"),
    ("beacon", "beacon"),
    ("chimes", "chimes"),
    ("sunrise", "sunrise_melody"),
];

pub const DEFAULT_SOUND: &str = "alarm_classic";

/// Tried in order after the requested sound fails.
pub const FALLBACK_ORDER: &[&str] = &["alarm_classic", "radar", "beacon", "chimes"];

const EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg"];

/// Maps a sound id to its resource name. Unknown ids get the default.
pub fn resource_name(sound_id: &str) -> &'static str {
    SOUND_TABLE
        .iter()
        .find(|(id, _)| id.eq_ignore_ascii_case(sound_id.trim()))
        .map(|(_, name)| *name)
        .unwrap_or(DEFAULT_SOUND)
}

/// The requested resource followed by every fallback that differs from it.
pub fn playback_chain(sound_id: &str) -> Vec<&'static str> {
    let primary = resource_name(sound_id);
    std::iter::once(primary)
        .chain(FALLBACK_ORDER.iter().copied().filter(|name| *name != primary))
        .collect()
}

#[derive(Debug, Clone)]
pub struct SoundLibrary {
    root: PathBuf,
}

impl SoundLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Existing files for `name`, in extension priority order. Empty is fine.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{name}.{ext}")))
            .filter(|path| path.is_file())
            .collect()
    }
}
