//! Output publisher: ranked, chunked key files and a link index

use crate::proxy::models::{LiveEntry, SourceTag};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// File holding every published line
pub const ALL_KEYS_FILE: &str = "live_keys.txt";

/// Index of chunk file links
pub const INDEX_FILE: &str = "links.txt";

/// Chunk files written by earlier runs
static CHUNK_FILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(general|whitelist)_\d+\.txt$").expect("Invalid chunk file regex"));

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub output_dir: PathBuf,
    pub chunk_size: usize,
    pub channel_tag: String,
    pub link_base: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("checked"),
            chunk_size: 500,
            channel_tag: String::new(),
            link_base: None,
        }
    }
}

/// One bounded-size output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub tag: SourceTag,
    pub file_name: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub published: usize,
    pub chunks: Vec<PathBuf>,
    pub index: Option<PathBuf>,
}

pub struct OutputPublisher {
    config: PublisherConfig,
}

impl OutputPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self { config }
    }

    /// Sort by latency, fastest first, ties by id
    pub fn rank(entries: &mut [LiveEntry]) {
        entries.sort_by(|a, b| a.latency_ms.cmp(&b.latency_ms).then_with(|| a.id.cmp(&b.id)));
    }

    /// `<id>#<country>_<quality>_<latency>ms_<channel>`
    pub fn render_line(&self, entry: &LiveEntry) -> String {
        let mut parts = Vec::with_capacity(4);
        if let Some(country) = &entry.country {
            parts.push(country.clone());
        }
        parts.push(entry.quality().to_string());
        parts.push(format!("{}ms", entry.latency_ms));
        if !self.config.channel_tag.is_empty() {
            parts.push(self.config.channel_tag.clone());
        }
        format!("{}#{}", entry.id, parts.join("_").replace(' ', "_"))
    }

    /// Split ranked entries into per-tag chunks of at most `chunk_size` lines
    pub fn chunks(&self, entries: &[LiveEntry]) -> Vec<Chunk> {
        let size = self.config.chunk_size.max(1);
        let mut chunks = Vec::new();

        for tag in SourceTag::ALL {
            let lines: Vec<String> = entries
                .iter()
                .filter(|e| e.source_tag == tag)
                .map(|e| self.render_line(e))
                .collect();

            for (n, part) in lines.chunks(size).enumerate() {
                chunks.push(Chunk {
                    tag,
                    file_name: format!("{}_{}.txt", tag, n + 1),
                    lines: part.to_vec(),
                });
            }
        }

        chunks
    }

    /// One link per chunk file, in chunk order
    pub fn render_index(&self, chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .map(|chunk| match &self.config.link_base {
                Some(base) => format!("{}/{}", base.trim_end_matches('/'), chunk.file_name),
                None => chunk.file_name.clone(),
            })
            .map(|link| link + "\n")
            .collect()
    }

    /// Write the aggregate file, chunk files and link index
    pub fn publish(&self, mut entries: Vec<LiveEntry>) -> Result<PublishReport> {
        Self::rank(&mut entries);
        let dir = &self.config.output_dir;
        fs::create_dir_all(dir)?;
        remove_stale_chunks(dir)?;

        let all: String = entries
            .iter()
            .map(|e| self.render_line(e) + "\n")
            .collect();
        fs::write(dir.join(ALL_KEYS_FILE), all)?;

        let chunks = self.chunks(&entries);
        let mut written = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let path = dir.join(&chunk.file_name);
            let mut content = chunk.lines.join("\n");
            content.push('\n');
            fs::write(&path, content)?;
            written.push(path);
        }

        let index = dir.join(INDEX_FILE);
        fs::write(&index, self.render_index(&chunks))?;

        tracing::info!(
            "published {} keys in {} chunk files to {:?}",
            entries.len(),
            written.len(),
            dir
        );

        Ok(PublishReport {
            published: entries.len(),
            chunks: written,
            index: Some(index),
        })
    }
}

fn remove_stale_chunks(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if CHUNK_FILE_REGEX.is_match(&name.to_string_lossy()) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
