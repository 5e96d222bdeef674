use super::estimate_token_count as estimate_token_count_impl;
use super::*;
use crate::index::MetadataValue;

fn numbered_lines(count: usize) -> String {
    (1..=count)
        .map(|i| format!("let value_{i} = compute({i});"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn config(max_lines: usize, overlap_lines: usize) -> ChunkingConfig {
    ChunkingConfig {
        max_lines,
        overlap_lines,
        max_chars: 4000,
        min_chars: 1,
    }
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("This is a test."), 5);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn small_file_is_one_chunk() {
    let source = "def foo():\n    return 1\n";
    let chunks = chunk_source("pkg/foo.py", source, &config(60, 10));

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].start_line, 1);
    assert_eq!(chunks[0].end_line, 2);
    assert_eq!(chunks[0].language, "python");
    assert_eq!(chunks[0].content, "def foo():\n    return 1");
}

#[test]
fn windows_overlap_and_cover_every_line() {
    let source = numbered_lines(25);
    let chunks = chunk_source("src/lib.rs", &source, &config(10, 3));

    let ranges: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
    assert_eq!(ranges, vec![(1, 10), (8, 17), (15, 24), (22, 25)]);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
    }
}

#[test]
fn char_limit_splits_before_line_limit() {
    let source = numbered_lines(10);
    let max_chars = 60;
    let chunks = chunk_source(
        "src/lib.rs",
        &source,
        &ChunkingConfig {
            max_lines: 100,
            overlap_lines: 0,
            max_chars,
            min_chars: 1,
        },
    );

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.content.len() <= max_chars));
    assert_eq!(chunks.last().map(|c| c.end_line), Some(10));
}

#[test]
fn overlong_line_is_truncated_on_char_boundary() {
    let source = "é".repeat(100);
    let chunks = chunk_source(
        "notes.md",
        &source,
        &ChunkingConfig {
            max_lines: 10,
            overlap_lines: 0,
            max_chars: 51,
            min_chars: 1,
        },
    );

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content.len(), 50);
}

#[test]
fn tiny_chunks_are_dropped() {
    let chunks = chunk_source(
        "src/empty.rs",
        "\n\n}\n",
        &ChunkingConfig {
            min_chars: 5,
            ..ChunkingConfig::default()
        },
    );
    assert!(chunks.is_empty());
    assert!(chunk_source("src/none.rs", "", &ChunkingConfig::default()).is_empty());
}

#[test]
fn chunk_becomes_document_with_metadata() {
    let chunk = chunk_source("src/main.rs", "fn main() {\n    run();\n}", &config(60, 10))
        .pop()
        .expect("one chunk");
    let document = chunk.into_document();

    assert_eq!(document.file_path(), Some("src/main.rs"));
    assert_eq!(
        document.metadata.get("language"),
        Some(&MetadataValue::from("rust"))
    );
    assert_eq!(
        document.metadata.get("end_line").and_then(MetadataValue::as_i64),
        Some(3)
    );
}

#[test]
fn language_detection() {
    assert_eq!(language_for_path("a/b/c.TS"), "typescript");
    assert_eq!(language_for_path("Makefile"), "text");
    assert_eq!(language_for_path("x.hpp"), "cpp");
}
