use crate::error::{ChunkerError, Result};
use crate::language::Language;
use serde::{Deserialize, Serialize};

/// Window sizing for [`Chunker`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum number of source lines in one chunk (doubled for prose formats)
    pub max_chunk_lines: usize,
    /// Lines shared between consecutive chunks
    pub overlap_lines: usize,
    /// Hard cap on chunk size in bytes; long lines are split to honor it
    pub max_chunk_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: 60,
            overlap_lines: 8,
            max_chunk_chars: 4000,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_lines == 0 {
            return Err(ChunkerError::invalid_config("max_chunk_lines must be > 0"));
        }
        if self.overlap_lines >= self.max_chunk_lines {
            return Err(ChunkerError::invalid_config(format!(
                "overlap_lines ({}) must be smaller than max_chunk_lines ({})",
                self.overlap_lines, self.max_chunk_lines
            )));
        }
        if self.max_chunk_chars < 64 {
            return Err(ChunkerError::invalid_config(format!(
                "max_chunk_chars must be >= 64 (got {})",
                self.max_chunk_chars
            )));
        }
        Ok(())
    }
}

/// One ordered piece of a file, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// 1-based, inclusive
    pub start_line: usize,
    /// 1-based, inclusive
    pub end_line: usize,
    pub language: Language,
}

/// Line-window chunker
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub const fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk file contents. `path` is only used for language detection.
    ///
    /// Empty input yields no chunks; any other input yields at least one, and
    /// every chunk carries the same `total_chunks`.
    pub fn chunk_str(&self, content: &str, path: Option<&str>) -> Result<Vec<TextChunk>> {
        self.config.validate()?;
        if content.is_empty() {
            return Ok(Vec::new());
        }

        let language = path.map_or(Language::Unknown, Language::from_path);
        let max_lines = if language.is_prose() {
            self.config.max_chunk_lines * 2
        } else {
            self.config.max_chunk_lines
        };
        let lines = split_lines(content, self.config.max_chunk_chars);
        let windows = plan_windows(
            &lines,
            max_lines,
            self.config.overlap_lines,
            self.config.max_chunk_chars,
        );

        let total_chunks = windows.len();
        Ok(windows
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| TextChunk {
                text: lines[start..end].iter().map(|(_, line)| *line).collect(),
                chunk_index,
                total_chunks,
                start_line: lines[start].0,
                end_line: lines[end - 1].0,
                language,
            })
            .collect())
    }
}

/// Split into `(line_number, text)` pieces, keeping line terminators. Lines
/// longer than `max_chars` are cut on char boundaries and share a line number.
fn split_lines(content: &str, max_chars: usize) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        if line.len() <= max_chars {
            out.push((line_no, line));
            continue;
        }

        let mut rest = line;
        while !rest.is_empty() {
            let mut cut = max_chars.min(rest.len());
            while cut > 0 && !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            let (head, tail) = rest.split_at(cut);
            out.push((line_no, head));
            rest = tail;
        }
    }
    out
}

/// Half-open `[start, end)` windows over `lines`.
fn plan_windows(
    lines: &[(usize, &str)],
    max_lines: usize,
    overlap: usize,
    max_chars: usize,
) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let mut end = start;
        let mut chars = 0;
        while end < lines.len() && end - start < max_lines {
            let len = lines[end].1.len();
            if end > start && chars + len > max_chars {
                break;
            }
            chars += len;
            end += 1;
        }
        windows.push((start, end));

        if end >= lines.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_always_advance() {
        let lines: Vec<(usize, &str)> = (1..=10).map(|n| (n, "x\n")).collect();
        let windows = plan_windows(&lines, 3, 2, 4000);
        assert_eq!(windows.first(), Some(&(0, 3)));
        assert_eq!(windows.last().map(|w| w.1), Some(10));
        for pair in windows.windows(2) {
            assert!(pair[1].0 > pair[0].0);
        }
    }

    #[test]
    fn long_line_is_split_on_char_boundaries() {
        let line = "é".repeat(100);
        let pieces = split_lines(&line, 64);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|(no, piece)| *no == 1 && piece.len() <= 64));
        let rebuilt: String = pieces.iter().map(|(_, p)| *p).collect();
        assert_eq!(rebuilt, line);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        let config = ChunkerConfig {
            max_chunk_lines: 4,
            overlap_lines: 4,
            ..ChunkerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
