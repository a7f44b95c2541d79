// Playlist resolver: turns a directory or a search pattern into an ordered
// list of playable tracks. Filesystem traversal lives here so the engine
// itself never walks directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::RegexBuilder;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::source::{is_stream, TrackRef};

#[derive(Clone)]
pub struct Resolver {
    music_dir: PathBuf,
    supported_extensions: Vec<String>,
}

impl Resolver {
    pub fn new<P: Into<PathBuf>>(music_dir: P) -> Self {
        Self {
            music_dir: music_dir.into(),
            supported_extensions: vec![
                "mp3".to_string(),
                "flac".to_string(),
                "ogg".to_string(),
                "oga".to_string(),
                "mp4".to_string(),
                "m4a".to_string(),
                "aac".to_string(),
                "wav".to_string(),
            ],
        }
    }

    pub fn music_dir(&self) -> &Path {
        &self.music_dir
    }

    /// All playable tracks under the configured music directory.
    pub fn resolve_default(&self) -> Vec<TrackRef> {
        self.resolve_dir(&self.music_dir)
    }

    /// All playable tracks under `dir`, in deterministic path order, plus
    /// any stations listed in an optional `radios` file at the top level.
    pub fn resolve_dir(&self, dir: &Path) -> Vec<TrackRef> {
        let mut paths = self.audio_files_under(dir);
        paths.sort();

        let mut tracks: Vec<TrackRef> = paths.into_iter().map(TrackRef::File).collect();
        tracks.extend(self.read_radios_file(dir));
        tracks
    }

    /// Resolve a search pattern against the music directory.
    ///
    /// - a stream URL plays directly
    /// - `#recent[:N]` selects the most recently modified files
    /// - anything else is a case-insensitive regex over full paths
    ///
    /// Returns the matches in playback order; empty means no match.
    pub fn search(&self, pattern: &str) -> Result<Vec<TrackRef>> {
        if is_stream(pattern) {
            return Ok(vec![TrackRef::stream(pattern)]);
        }

        if let Some(query) = pattern.strip_prefix('#') {
            return Ok(self.special_query(query));
        }

        let regexp = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(r) => r,
            Err(e) => {
                warn!("invalid search pattern {:?}: {}", pattern, e);
                return Ok(Vec::new());
            }
        };

        let mut paths = self.audio_files_under(&self.music_dir);
        paths.sort();
        let matches: Vec<TrackRef> = paths
            .into_iter()
            .filter(|p| regexp.is_match(&p.to_string_lossy()))
            .map(TrackRef::File)
            .collect();

        info!("search {:?} found {} tracks", pattern, matches.len());
        Ok(matches)
    }

    // `#recent` plays everything ordered by modification date (newest
    // first); `#recent:10` limits to the 10 most recent files.
    fn special_query(&self, query: &str) -> Vec<TrackRef> {
        let (key, options) = match query.split_once(':') {
            Some((k, o)) => (k, Some(o)),
            None => (query, None),
        };

        if key != "recent" {
            warn!("unknown special '#' query {:?}", key);
            return Vec::new();
        }

        let mut dated: Vec<(SystemTime, PathBuf)> = self
            .audio_files_under(&self.music_dir)
            .into_iter()
            .filter_map(|p| {
                let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((modified, p))
            })
            .collect();
        dated.sort_by(|a, b| b.0.cmp(&a.0));

        if let Some(limit) = options.and_then(|o| o.parse::<usize>().ok()) {
            dated.truncate(limit);
            info!("queue reduced to its {} first elements", limit);
        }

        dated.into_iter().map(|(_, p)| TrackRef::File(p)).collect()
    }

    fn audio_files_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        for entry in WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }

            // Skip hidden files (dotfiles)
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.'))
            {
                continue;
            }

            // Skip empty files
            if let Ok(metadata) = fs::metadata(path) {
                if metadata.len() == 0 {
                    continue;
                }
            }

            if self.is_supported_file(path) {
                paths.push(path.to_path_buf());
            }
        }

        paths
    }

    // A `radios` file at the directory root lists one station per line,
    // either `url` alone or `Name | url`. Lines starting with # are skipped.
    fn read_radios_file(&self, dir: &Path) -> Vec<TrackRef> {
        let radios_path = dir.join("radios");
        let content = match fs::read_to_string(&radios_path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut stations = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let station = match line.split_once('|') {
                Some((name, url)) => TrackRef::Stream {
                    name: Some(name.trim().to_string()),
                    url: url.trim().to_string(),
                },
                None => TrackRef::stream(line),
            };
            if let TrackRef::Stream { url, .. } = &station {
                if !is_stream(url) {
                    warn!("ignoring non-stream radios entry {:?}", line);
                    continue;
                }
            }
            stations.push(station);
        }

        info!("loaded {} stations from {}", stations.len(), radios_path.display());
        stations
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let normalized = ext.to_ascii_lowercase();
                self.supported_extensions.contains(&normalized)
            })
            .unwrap_or(false)
    }
}
