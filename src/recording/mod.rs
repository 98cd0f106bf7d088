//! Recording data model and destination naming.
//!
//! A recording is an opaque set of named binary streams plus metadata; the
//! descriptors here are produced by the enumerator and never mutated after.
//! Destination folder and file names are rendered from operator-configured
//! templates and sanitized for every backend.

use crate::config::RecordingsConfig;
use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use regex::Regex;

/// One cloud recording: a meeting's full set of media/metadata files.
#[derive(Debug, Clone)]
pub struct RecordingDescriptor {
    /// Stable unique id assigned by the source platform.
    pub id: String,
    /// Owning account/user id.
    pub account: String,
    pub topic: String,
    /// Meeting start, timezone-naive UTC.
    pub start_time: NaiveDateTime,
    pub files: Vec<FileDescriptor>,
}

/// A single file belonging to one recording.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub file_id: String,
    /// Lowercase extension without the dot, e.g. "mp4".
    pub extension: String,
    /// Size reported by the source; 0 when unknown (e.g. caption tracks).
    pub size: u64,
    /// Opaque token the source resolves to bytes (a download URL here).
    pub locator: String,
    /// Source-side stream tag, e.g. "shared_screen_with_speaker".
    pub recording_type: String,
}

/// Where a file ends up, relative to the backend's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSpec {
    pub folder: String,
    pub filename: String,
    /// Expected byte size, for post-placement verification. 0 = unknown.
    pub size: u64,
}

impl DestinationSpec {
    /// Destination as a single `/`-separated relative path.
    pub fn relative_path(&self) -> String {
        if self.folder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.folder, self.filename)
        }
    }
}

/// Renders destination names from the configured templates.
pub struct NameTemplates {
    folder_template: String,
    filename_template: String,
    timestamp_format: String,
    invalid_chars: Regex,
}

impl NameTemplates {
    pub fn from_config(config: &RecordingsConfig) -> Result<Self> {
        Self::new(
            &config.folder_template,
            &config.filename_template,
            &config.timestamp_format,
        )
    }

    pub fn new(folder_template: &str, filename_template: &str, timestamp_format: &str) -> Result<Self> {
        if filename_template.trim().is_empty() {
            bail!("filename_template must not be empty");
        }
        Ok(Self {
            folder_template: folder_template.to_string(),
            filename_template: filename_template.to_string(),
            timestamp_format: timestamp_format.to_string(),
            invalid_chars: Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#)?,
        })
    }

    /// Render the destination for one file of one recording.
    pub fn destination(
        &self,
        recording: &RecordingDescriptor,
        file: &FileDescriptor,
    ) -> DestinationSpec {
        let topic = self.sanitize(&recording.topic);
        let rec_type = title_case(&file.recording_type);
        let meeting_time = recording
            .start_time
            .format(&self.timestamp_format)
            .to_string();

        let render = |template: &str| -> String {
            template
                .replace("{topic}", &topic)
                .replace("{meeting_time}", &meeting_time)
                .replace("{year}", &recording.start_time.format("%Y").to_string())
                .replace("{month}", &recording.start_time.format("%m").to_string())
                .replace("{day}", &recording.start_time.format("%d").to_string())
                .replace("{rec_type}", &rec_type)
                .replace("{recording_id}", &file.file_id)
                .replace("{file_extension}", &file.extension.to_lowercase())
        };

        // Slashes written into the folder template denote nesting; each
        // segment is sanitized on its own. Filenames never contain
        // separators.
        let folder = render(&self.folder_template)
            .split('/')
            .map(|segment| self.sanitize(segment))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        DestinationSpec {
            folder,
            filename: self.sanitize(&render(&self.filename_template)),
            size: file.size,
        }
    }

    fn sanitize(&self, name: &str) -> String {
        self.invalid_chars.replace_all(name, "").trim().to_string()
    }
}

/// "shared_screen_with_speaker" -> "Shared Screen With Speaker".
fn title_case(tag: &str) -> String {
    tag.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Directory name safe for namespacing one recording's staging area.
pub fn staging_name(recording_id: &str) -> String {
    recording_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        })
        .collect()
}
