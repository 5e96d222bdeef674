#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::index::Document;

/// A contiguous line range of one source file, ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    /// The chunk text
    pub content: String,
    /// Path relative to the repository root, `/`-separated
    pub file_path: String,
    /// Language guessed from the file extension
    pub language: &'static str,
    /// First line, 1-based inclusive
    pub start_line: usize,
    /// Last line, 1-based inclusive
    pub end_line: usize,
    /// Position of this chunk within its file
    pub chunk_index: usize,
    /// Estimated token count
    pub token_count: usize,
}

impl CodeChunk {
    #[inline]
    pub fn into_document(self) -> Document {
        Document::new(self.content)
            .with_metadata("file_path", self.file_path)
            .with_metadata("language", self.language)
            .with_metadata("start_line", self.start_line)
            .with_metadata("end_line", self.end_line)
            .with_metadata("chunk_index", self.chunk_index)
            .with_metadata("token_count", self.token_count)
    }
}

/// Configuration for line-based source chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum lines per chunk
    pub max_lines: usize,
    /// Lines repeated at the start of the following chunk
    pub overlap_lines: usize,
    /// Maximum bytes per chunk; longer lines are truncated to fit
    pub max_chars: usize,
    /// Chunks with less non-whitespace text than this are dropped
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_lines: 60,
            overlap_lines: 10,
            max_chars: 4000,
            min_chars: 20,
        }
    }
}

/// Split one source file into overlapping line windows
#[inline]
pub fn chunk_source(file_path: &str, content: &str, config: &ChunkingConfig) -> Vec<CodeChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let language = language_for_path(file_path);
    let max_lines = config.max_lines.max(1);
    let overlap = config.overlap_lines.min(max_lines - 1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let mut end = start;
        let mut text = String::new();

        while end < lines.len() && end - start < max_lines {
            let line = lines[end];
            let needed = line.len() + usize::from(!text.is_empty());
            if !text.is_empty() && text.len() + needed > config.max_chars {
                break;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            if line.len() > config.max_chars {
                text.push_str(truncate_at_char_boundary(line, config.max_chars));
            } else {
                text.push_str(line);
            }
            end += 1;
        }

        let non_whitespace = text.chars().filter(|c| !c.is_whitespace()).count();
        if non_whitespace >= config.min_chars {
            let token_count = estimate_token_count(&text);
            chunks.push(CodeChunk {
                content: text,
                file_path: file_path.to_string(),
                language,
                start_line: start + 1,
                end_line: end,
                chunk_index: chunks.len(),
                token_count,
            });
        }

        if end >= lines.len() {
            break;
        }
        // Always advance by at least one line
        start = end.saturating_sub(overlap).max(start + 1);
    }

    debug!(
        "Chunked {} ({} lines) into {} chunks",
        file_path,
        lines.len(),
        chunks.len()
    );
    chunks
}

fn truncate_at_char_boundary(line: &str, max_bytes: usize) -> &str {
    let mut cut = max_bytes.min(line.len());
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    &line[..cut]
}

/// Rough token estimate used for diagnostics metadata
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words, plus some weight for punctuation
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

/// Map a file extension to a language name
#[inline]
pub fn language_for_path(file_path: &str) -> &'static str {
    let extension = std::path::Path::new(file_path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" => "shell",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "sql" => "sql",
        _ => "text",
    }
}
