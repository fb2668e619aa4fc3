//! Text chunking with boundary preservation and overlap.
//!
//! This module turns extracted document text into bounded, overlapping,
//! metadata-annotated segments sized for embedding. Highlights:
//!
//! - Boundary preservation: paragraph boundaries first, sentence boundaries
//!   inside oversized paragraphs, raw character slicing as the last resort.
//! - Overlap: the trailing characters of a flushed chunk seed the next one,
//!   trimmed to a word boundary so chunks never start mid-word.
//! - Metadata: each chunk carries word/sentence counts plus mode-specific
//!   fields (`paragraph_index`, markdown section type).
//!
//! Offsets are char offsets into the normalized input, and chunk indexes form
//! a contiguous 0-based sequence across one call, including sub-chunks
//! produced by recursion into finer-grained modes.

use serde::Serialize;

/// Options controlling how [`chunk_text`] splits its input.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Maximum characters per chunk.
    pub max_chunk_size: usize,
    /// Overlap between consecutive chunks, in characters.
    pub overlap: usize,
    /// Prefer paragraph boundaries when splitting.
    pub preserve_paragraphs: bool,
    /// Prefer sentence boundaries when paragraphs are disabled.
    pub preserve_sentences: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 200,
            preserve_paragraphs: true,
            preserve_sentences: true,
        }
    }
}

/// Derived annotations attached to every produced chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Whitespace-delimited token count of the chunk content.
    pub word_count: usize,
    /// Number of sentence-terminal punctuation runs in the content.
    pub sentence_count: usize,
    /// Index of the source paragraph, for paragraph-mode chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph_index: Option<usize>,
    /// Chunk kind marker, e.g. `markdown-section`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A bounded segment of a document's text, sized for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Trimmed chunk content.
    pub content: String,
    /// 0-based sequence order within the chunking call.
    pub index: usize,
    /// Char offset of the chunk within the normalized source text.
    pub start_position: usize,
    /// End offset; `end_position - start_position` equals the content length in chars.
    pub end_position: usize,
    /// Derived metadata for the chunk.
    pub metadata: ChunkMetadata,
}

/// Split plain text into bounded, overlapping chunks.
///
/// Empty or whitespace-only input yields an empty vector. Input shorter than
/// the chunk budget yields a single chunk equal to the normalized input.
pub fn chunk_text(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let clean = normalize_text(text);
    if clean.is_empty() {
        return Vec::new();
    }

    tracing::debug!(
        chars = char_len(&clean),
        max_chunk_size = options.max_chunk_size,
        overlap = options.overlap,
        "Chunking text"
    );

    let chunks = if options.preserve_paragraphs {
        chunk_by_paragraphs(&clean, options.max_chunk_size, options.overlap)
    } else if options.preserve_sentences {
        chunk_by_sentences(&clean, options.max_chunk_size, options.overlap)
    } else {
        chunk_by_characters(&clean, options.max_chunk_size, options.overlap)
    };

    tracing::debug!(chunks = chunks.len(), "Created chunks from text");
    chunks
}

/// Split markdown into chunks aligned with heading sections.
///
/// Sections are delimited by heading lines (`#` through `######` followed by
/// whitespace). Sections within the budget become a single chunk; oversized
/// sections fall back to paragraph chunking. Every chunk's metadata carries
/// the `markdown-section` kind.
pub fn chunk_markdown(markdown: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let sections = split_by_headings(markdown);
    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;
    let mut current_start = 0usize;

    for section in sections {
        let section_len = char_len(&section);
        if section_len <= options.max_chunk_size {
            let mut chunk = create_chunk(&section, chunk_index, current_start);
            chunk_index += 1;
            chunk.metadata.kind = Some(MARKDOWN_SECTION.to_string());
            chunks.push(chunk);
        } else {
            for mut sub in chunk_by_paragraphs(&section, options.max_chunk_size, options.overlap) {
                sub.index = chunk_index;
                chunk_index += 1;
                sub.start_position += current_start;
                sub.end_position += current_start;
                sub.metadata.kind = Some(MARKDOWN_SECTION.to_string());
                chunks.push(sub);
            }
        }
        current_start += section_len;
    }

    chunks
}

const MARKDOWN_SECTION: &str = "markdown-section";

/// Normalize raw text before splitting: CRLF/CR to LF, tabs to spaces,
/// collapsed space runs, trimmed ends.
fn normalize_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut previous_space = false;

    while let Some(c) = chars.next() {
        let c = match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                '\n'
            }
            '\t' => ' ',
            other => other,
        };
        if c == ' ' {
            if previous_space {
                continue;
            }
            previous_space = true;
        } else {
            previous_space = false;
        }
        normalized.push(c);
    }

    normalized.trim().to_string()
}

fn chunk_by_paragraphs(text: &str, max_size: usize, overlap: usize) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_start = 0usize;
    let mut chunk_index = 0usize;
    let mut paragraph_index = 0usize;

    for paragraph in split_paragraphs(text) {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        let trimmed_len = char_len(trimmed);

        if trimmed_len > max_size {
            // Flush the running buffer, then recurse into sentence mode.
            if !current.is_empty() {
                chunks.push(create_chunk(&current, chunk_index, current_start));
                chunk_index += 1;
                current.clear();
            }
            for mut sub in chunk_by_sentences(trimmed, max_size, overlap) {
                sub.index = chunk_index;
                chunk_index += 1;
                sub.start_position += current_start;
                sub.end_position += current_start;
                sub.metadata.paragraph_index = Some(paragraph_index);
                chunks.push(sub);
            }
            current_start += trimmed_len + 2;
            paragraph_index += 1;
            continue;
        }

        if !current.is_empty() && char_len(&current) + trimmed_len + 2 > max_size {
            let mut chunk = create_chunk(&current, chunk_index, current_start);
            chunk_index += 1;
            chunk.metadata.paragraph_index = Some(paragraph_index.saturating_sub(1));
            chunks.push(chunk);

            let overlap_text = overlap_seed(&current, overlap);
            current = if overlap_text.is_empty() {
                String::new()
            } else {
                format!("{overlap_text}\n\n")
            };
            current_start += char_len(&current) - char_len(&overlap_text);
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(trimmed);
        paragraph_index += 1;
    }

    if !current.is_empty() {
        let mut chunk = create_chunk(&current, chunk_index, current_start);
        chunk.metadata.paragraph_index = Some(paragraph_index);
        chunks.push(chunk);
    }

    chunks
}

fn chunk_by_sentences(text: &str, max_size: usize, overlap: usize) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_start = 0usize;
    let mut chunk_index = 0usize;
    let mut sentence_count = 0usize;

    for sentence in split_sentences(text) {
        let trimmed = sentence.trim();
        if trimmed.is_empty() {
            continue;
        }
        let trimmed_len = char_len(trimmed);

        if trimmed_len > max_size {
            // A single sentence over the budget falls back to raw slicing.
            if !current.is_empty() {
                let mut chunk = create_chunk(&current, chunk_index, current_start);
                chunk_index += 1;
                chunk.metadata.sentence_count = sentence_count;
                chunks.push(chunk);
                current.clear();
                sentence_count = 0;
            }
            for mut sub in chunk_by_characters(trimmed, max_size, overlap) {
                sub.index = chunk_index;
                chunk_index += 1;
                sub.start_position += current_start;
                sub.end_position += current_start;
                chunks.push(sub);
            }
            current_start += trimmed_len + 1;
            continue;
        }

        if !current.is_empty() && char_len(&current) + trimmed_len + 1 > max_size {
            let mut chunk = create_chunk(&current, chunk_index, current_start);
            chunk_index += 1;
            chunk.metadata.sentence_count = sentence_count;
            chunks.push(chunk);

            let overlap_text = overlap_seed(&current, overlap);
            current = if overlap_text.is_empty() {
                String::new()
            } else {
                format!("{overlap_text} ")
            };
            current_start += char_len(&current) - char_len(&overlap_text);
            sentence_count = 0;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(trimmed);
        sentence_count += 1;
    }

    if !current.is_empty() {
        let mut chunk = create_chunk(&current, chunk_index, current_start);
        chunk.metadata.sentence_count = sentence_count;
        chunks.push(chunk);
    }

    chunks
}

fn chunk_by_characters(text: &str, max_size: usize, overlap: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0usize;
    // The window must always move forward, even when overlap >= max_size.
    let advance = max_size.saturating_sub(overlap).max(1);

    while start < chars.len() {
        let end = (start + max_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        chunks.push(create_chunk(&piece, chunk_index, start));
        chunk_index += 1;
        if end == chars.len() {
            break;
        }
        start += advance;
    }

    chunks
}

fn create_chunk(content: &str, index: usize, start_position: usize) -> TextChunk {
    let trimmed = content.trim();
    TextChunk {
        content: trimmed.to_string(),
        index,
        start_position,
        end_position: start_position + char_len(trimmed),
        metadata: ChunkMetadata {
            word_count: count_words(trimmed),
            sentence_count: count_sentences(trimmed),
            paragraph_index: None,
            kind: None,
        },
    }
}

/// Trailing `overlap` chars of a flushed chunk, advanced to the first word
/// boundary so the next chunk never starts mid-word. Returns an empty string
/// when the overlap is zero or would cover the whole chunk.
fn overlap_seed(text: &str, overlap: usize) -> String {
    let len = char_len(text);
    if overlap == 0 || overlap >= len {
        return String::new();
    }

    let tail: String = text.chars().skip(len - overlap).collect();
    match tail.char_indices().find(|(_, c)| *c == ' ') {
        Some((0, _)) | None => tail,
        Some((byte_idx, _)) => tail[byte_idx + 1..].to_string(),
    }
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if is_terminal(c) {
            while let Some(&next) = chars.peek() {
                if !is_terminal(next) {
                    break;
                }
                current.push(next);
                chars.next();
            }
            sentences.push(std::mem::take(&mut current));
        }
    }
    // Keep an unterminated tail rather than dropping its text.
    if !current.trim().is_empty() {
        sentences.push(current);
    }

    if sentences.is_empty() && !text.is_empty() {
        return vec![text.to_string()];
    }
    sentences
}

fn split_by_headings(markdown: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in markdown.split('\n') {
        if is_heading(line) {
            if !current.trim().is_empty() {
                sections.push(current.trim().to_string());
            }
            current = format!("{line}\n");
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }

    sections
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes)
        && line
            .chars()
            .nth(hashes)
            .map(char::is_whitespace)
            .unwrap_or(false)
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn count_sentences(text: &str) -> usize {
    let mut runs = 0;
    let mut in_run = false;
    for c in text.chars() {
        if is_terminal(c) {
            if !in_run {
                runs += 1;
                in_run = true;
            }
        } else {
            in_run = false;
        }
    }
    runs
}
