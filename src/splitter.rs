//! Unit splitter: raw screenplay text into ordered, independently analyzable units.
//!
//! Scene headers (`INT.`, `EXT.`, `INT/EXT.`, `EXT/INT.` at the start of a line, any case)
//! start a new unit. Text without a single header is cut into fixed windows instead.
//! Either way the units are contiguous, never overlap, and together reproduce the input.

use regex::Regex;

use crate::config::SplitterConfig;
use crate::error::{Error, Result};

const SCENE_HEADER_PATTERN: &str = r"(?im)^(?:INT\.|EXT\.|INT/EXT\.|EXT/INT\.)[^\n]*$";

/// One unit produced by the splitter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitUnit {
    /// `S{n}` for scenes, a random UUID for fallback windows
    pub id: String,
    /// 0-based position
    pub index: usize,
    /// Trimmed scene header, or `Chunk {n}`
    pub title: String,
    /// Exact slice of the source covered by this unit
    pub text: String,
}

/// Compiled splitter, reusable across jobs
#[derive(Clone, Debug)]
pub struct UnitSplitter {
    header: Regex,
    window_chars: usize,
}

impl UnitSplitter {
    /// Build a splitter for the configured window size
    pub fn new(config: &SplitterConfig) -> Result<Self> {
        if config.max_unit_tokens == 0 || config.chars_per_token == 0 {
            return Err(Error::Chunking(format!(
                "window size must be positive (max_unit_tokens={}, chars_per_token={})",
                config.max_unit_tokens, config.chars_per_token
            )));
        }

        let header = Regex::new(SCENE_HEADER_PATTERN)
            .map_err(|e| Error::Chunking(format!("invalid scene header pattern: {}", e)))?;

        Ok(Self {
            header,
            window_chars: config.window_chars(),
        })
    }

    /// Fallback window size in characters
    pub fn window_chars(&self) -> usize {
        self.window_chars
    }

    /// Split `text` into units
    ///
    /// Empty or whitespace-only input yields no units.
    pub fn split(&self, text: &str) -> Vec<SplitUnit> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let headers: Vec<(usize, &str)> = self
            .header
            .find_iter(text)
            .map(|m| (m.start(), m.as_str().trim()))
            .collect();

        if headers.is_empty() {
            self.split_windows(text)
        } else {
            self.split_scenes(text, &headers)
        }
    }

    fn split_scenes(&self, text: &str, headers: &[(usize, &str)]) -> Vec<SplitUnit> {
        let mut units = Vec::with_capacity(headers.len());

        for (i, (start, title)) in headers.iter().enumerate() {
            // Anything before the first header belongs to the first scene
            let start = if i == 0 { 0 } else { *start };
            let end = headers.get(i + 1).map_or(text.len(), |(next, _)| *next);
            let body = &text[start..end];

            let chars = body.chars().count();
            if chars > self.window_chars {
                tracing::debug!(
                    scene = i + 1,
                    chars,
                    window_chars = self.window_chars,
                    "Scene exceeds target unit size, keeping it whole"
                );
            }

            units.push(SplitUnit {
                id: format!("S{}", i + 1),
                index: i,
                title: (*title).to_string(),
                text: body.to_string(),
            });
        }

        units
    }

    fn split_windows(&self, text: &str) -> Vec<SplitUnit> {
        let mut bounds = Vec::new();
        let mut start = 0;
        let mut count = 0;

        for (offset, _) in text.char_indices() {
            if count == self.window_chars {
                bounds.push((start, offset));
                start = offset;
                count = 0;
            }
            count += 1;
        }
        if start < text.len() {
            bounds.push((start, text.len()));
        }

        tracing::debug!(
            windows = bounds.len(),
            window_chars = self.window_chars,
            "No scene headers found, using fixed-size windows"
        );

        bounds
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| SplitUnit {
                id: uuid::Uuid::new_v4().to_string(),
                index,
                title: format!("Chunk {}", index + 1),
                text: text[start..end].to_string(),
            })
            .collect()
    }
}

/// Split `text` with a one-off splitter
pub fn split_units(text: &str, config: &SplitterConfig) -> Result<Vec<SplitUnit>> {
    Ok(UnitSplitter::new(config)?.split(text))
}
