//! Hybrid semantic chunker (C5, §4.1).
//!
//! Splits extracted document text into an ordered, finite sequence of chunks:
//! structural boundaries first (headings, lists, tables, code, paragraphs),
//! then size normalisation into a 256-512 token target, falling back to a
//! sliding window with overlap when a single structural unit is oversized.
//! Requirements-style sentences ("shall/should/must") are never split across
//! a window boundary; tables and code blocks are never split internally.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::ChunkType;

/// Approximate chars-per-token ratio, consistent with the char-based token
/// estimate used throughout the ingestion pipeline (no tokenizer dependency
/// is pulled in just for chunk sizing).
const CHARS_PER_TOKEN: usize = 4;

/// A chunk produced by the chunker, not yet assigned an id (that happens at
/// persistence time in C6, where point id = chunk id is established).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub sequence: i64,
    pub chunk_type: ChunkType,
    pub section_path: String,
    pub page: Option<i64>,
    pub token_count: i64,
    pub content: String,
    pub content_hash: String,
    /// Non-fatal notes recorded on the chunk (e.g. "replacement characters
    /// present" for non-UTF-8 input, §4.1 edge cases).
    pub flags: Vec<String>,
}

pub(crate) fn estimate_tokens(s: &str) -> usize {
    (s.chars().count() / CHARS_PER_TOKEN).max(1)
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_requirement_sentence(s: &str) -> bool {
    let lower = s.to_lowercase();
    lower.contains("shall") || lower.contains("should") || lower.contains("must")
}

/// Decode raw bytes as UTF-8, falling back to lossy replacement. Returns the
/// text and whether replacement characters were introduced (§4.1: "Non-UTF-8
/// bytes are decoded with replacement and flagged in chunk metadata").
pub fn decode_text_lossy(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), false),
        Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Title,
    List,
    Table,
    Code,
    Body,
}

struct Segment {
    kind: SegmentKind,
    text: String,
}

/// Split raw text into structurally-bounded segments (§4.1 step 1), without
/// merging across section changes. Headings, fenced code blocks, pipe tables,
/// and bullet/numbered lists are each isolated from surrounding paragraphs.
fn segment_document(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut lines = text.lines().peekable();
    let mut para_buf: Vec<&str> = Vec::new();

    let flush_para = |buf: &mut Vec<&str>, segments: &mut Vec<Segment>| {
        if buf.is_empty() {
            return;
        }
        let joined = buf.join("\n").trim().to_string();
        buf.clear();
        if joined.is_empty() {
            return;
        }
        let kind = classify_paragraph(&joined);
        segments.push(Segment { kind, text: joined });
    };

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            flush_para(&mut para_buf, &mut segments);
            let mut code_lines = vec![line];
            for code_line in lines.by_ref() {
                code_lines.push(code_line);
                if code_line.trim().starts_with("```") {
                    break;
                }
            }
            segments.push(Segment {
                kind: SegmentKind::Code,
                text: code_lines.join("\n"),
            });
            continue;
        }

        if trimmed.is_empty() {
            flush_para(&mut para_buf, &mut segments);
            continue;
        }

        if trimmed.starts_with('#') {
            flush_para(&mut para_buf, &mut segments);
            segments.push(Segment {
                kind: SegmentKind::Title,
                text: trimmed.trim_start_matches('#').trim().to_string(),
            });
            continue;
        }

        para_buf.push(line);
    }
    flush_para(&mut para_buf, &mut segments);
    segments
}

fn classify_paragraph(text: &str) -> SegmentKind {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return SegmentKind::Body;
    }

    let table_lines = lines
        .iter()
        .filter(|l| l.matches('|').count() >= 2)
        .count();
    if table_lines * 2 >= lines.len() {
        return SegmentKind::Table;
    }

    let list_lines = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("- ")
                || t.starts_with("* ")
                || t.chars().next().is_some_and(|c| c.is_ascii_digit())
                    && t.contains(". ")
        })
        .count();
    if list_lines * 2 >= lines.len() {
        return SegmentKind::List;
    }

    SegmentKind::Body
}

fn segment_kind_to_chunk_type(kind: SegmentKind) -> ChunkType {
    match kind {
        SegmentKind::Title => ChunkType::Title,
        SegmentKind::List => ChunkType::List,
        SegmentKind::Table => ChunkType::Table,
        SegmentKind::Code => ChunkType::Code,
        SegmentKind::Body => ChunkType::Body,
    }
}

/// Split a paragraph into sentences, preferring sentence-boundary splits over
/// mid-sentence splits (§4.1 "Tie-breaks"). Keeps the terminator on the
/// sentence it ends.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let next_is_boundary = chars
                .get(i + 1)
                .map(|n| n.is_whitespace())
                .unwrap_or(true);
            if next_is_boundary {
                sentences.push(current.trim().to_string());
                current.clear();
            }
        }
        i += 1;
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Sliding-window split of an oversized body/list segment, with 10-20%
/// token overlap between consecutive windows (§4.1 step 3). Operates at
/// sentence granularity so a requirement sentence is never broken across a
/// window boundary unless that single sentence alone exceeds `max_tokens`,
/// in which case it is hard-split as a last resort.
fn window_split(text: &str, target_tokens: usize, max_tokens: usize, overlap_ratio: f64) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return vec![];
    }

    let overlap_tokens = ((target_tokens as f64) * overlap_ratio).round() as usize;
    let mut windows: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    let mut idx = 0;
    while idx < sentences.len() {
        let sentence = &sentences[idx];
        let sentence_tokens = estimate_tokens(sentence);

        if sentence_tokens > max_tokens {
            if !current.is_empty() {
                windows.push(current.join(" "));
                current.clear();
                current_tokens = 0;
            }
            if is_requirement_sentence(sentence) {
                // Requirement sentences are kept whole even when they alone
                // exceed max_tokens; the chunk is oversized rather than split.
                windows.push(sentence.clone());
            } else {
                for piece in hard_split(sentence, max_tokens) {
                    windows.push(piece);
                }
            }
            idx += 1;
            continue;
        }

        if current_tokens + sentence_tokens > max_tokens && !current.is_empty() {
            windows.push(current.join(" "));
            // carry trailing sentences worth ~overlap_tokens into the next window
            let mut carry: Vec<String> = Vec::new();
            let mut carry_tokens = 0usize;
            while let Some(last) = current.pop() {
                carry_tokens += estimate_tokens(&last);
                carry.insert(0, last);
                if carry_tokens >= overlap_tokens {
                    break;
                }
            }
            current = carry;
            current_tokens = carry_tokens;
        }

        current.push(sentence.clone());
        current_tokens += sentence_tokens;

        if current_tokens >= target_tokens {
            windows.push(current.join(" "));
            current.clear();
            current_tokens = 0;
        }

        idx += 1;
    }

    if !current.is_empty() {
        windows.push(current.join(" "));
    }

    windows
}

/// Last-resort hard character split for a single oversized sentence, same
/// break-at-whitespace heuristic the prior paragraph-only chunker used.
fn hard_split(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = remaining.len().min(max_chars);
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind(' ')
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
    pieces
}

fn make_draft(
    sequence: i64,
    chunk_type: ChunkType,
    section_path: &str,
    page: Option<i64>,
    content: &str,
    flags: &[String],
) -> ChunkDraft {
    ChunkDraft {
        sequence,
        chunk_type,
        section_path: section_path.to_string(),
        page,
        token_count: estimate_tokens(content) as i64,
        content: content.to_string(),
        content_hash: content_hash(content),
        flags: flags.to_vec(),
    }
}

/// Chunk a single page (or the whole document, when page boundaries are
/// unknown) of text. `page` is recorded on every chunk produced so citations
/// can point at it (§4.4 "Citation preparation").
pub fn chunk_text(text: &str, config: &ChunkingConfig, page: Option<i64>) -> Vec<ChunkDraft> {
    chunk_text_with_flags(text, config, page, &[])
}

fn chunk_text_with_flags(
    text: &str,
    config: &ChunkingConfig,
    page: Option<i64>,
    base_flags: &[String],
) -> Vec<ChunkDraft> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let segments = segment_document(text);
    let mut drafts = Vec::new();
    let mut sequence = 0i64;
    let mut section_path = String::new();

    // Buffer of same-section, mergeable pieces (body/list) awaiting a flush
    // once they reach the target size, never crossing a section boundary.
    let mut buffer: Vec<(ChunkType, String)> = Vec::new();
    let mut buffer_tokens = 0usize;

    let mut flush_buffer = |buffer: &mut Vec<(ChunkType, String)>,
                            buffer_tokens: &mut usize,
                            drafts: &mut Vec<ChunkDraft>,
                            sequence: &mut i64,
                            section_path: &str| {
        if buffer.is_empty() {
            return;
        }
        let chunk_type = buffer[0].0;
        let content = buffer
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        drafts.push(make_draft(
            *sequence,
            chunk_type,
            section_path,
            page,
            &content,
            base_flags,
        ));
        *sequence += 1;
        buffer.clear();
        *buffer_tokens = 0;
    };

    for segment in segments {
        match segment.kind {
            SegmentKind::Title => {
                flush_buffer(&mut buffer, &mut buffer_tokens, &mut drafts, &mut sequence, &section_path);
                section_path = segment.text.clone();
                drafts.push(make_draft(
                    sequence,
                    ChunkType::Title,
                    &section_path,
                    page,
                    &segment.text,
                    base_flags,
                ));
                sequence += 1;
            }
            SegmentKind::Table | SegmentKind::Code => {
                flush_buffer(&mut buffer, &mut buffer_tokens, &mut drafts, &mut sequence, &section_path);
                drafts.push(make_draft(
                    sequence,
                    segment_kind_to_chunk_type(segment.kind),
                    &section_path,
                    page,
                    &segment.text,
                    base_flags,
                ));
                sequence += 1;
            }
            SegmentKind::Body | SegmentKind::List => {
                let tokens = estimate_tokens(&segment.text);
                let chunk_type = segment_kind_to_chunk_type(segment.kind);

                if tokens > config.max_tokens {
                    flush_buffer(&mut buffer, &mut buffer_tokens, &mut drafts, &mut sequence, &section_path);
                    for window in window_split(
                        &segment.text,
                        config.target_tokens,
                        config.max_tokens,
                        config.overlap_ratio,
                    ) {
                        drafts.push(make_draft(sequence, chunk_type, &section_path, page, &window, base_flags));
                        sequence += 1;
                    }
                    continue;
                }

                if buffer_tokens + tokens > config.max_tokens && !buffer.is_empty() {
                    flush_buffer(&mut buffer, &mut buffer_tokens, &mut drafts, &mut sequence, &section_path);
                }
                buffer.push((chunk_type, segment.text));
                buffer_tokens += tokens;
                if buffer_tokens >= config.target_tokens {
                    flush_buffer(&mut buffer, &mut buffer_tokens, &mut drafts, &mut sequence, &section_path);
                }
            }
        }
    }
    flush_buffer(&mut buffer, &mut buffer_tokens, &mut drafts, &mut sequence, &section_path);

    drafts
}

/// Chunk a document that has already been split into pages (e.g. by a PDF
/// extractor that preserves page boundaries), producing a continuous
/// sequence number across pages while recording each chunk's page number.
pub fn chunk_pages(pages: &[String], config: &ChunkingConfig) -> Vec<ChunkDraft> {
    let mut all = Vec::new();
    let mut next_sequence = 0i64;
    for (idx, page_text) in pages.iter().enumerate() {
        let mut page_drafts = chunk_text(page_text, config, Some(idx as i64 + 1));
        for draft in &mut page_drafts {
            draft.sequence = next_sequence;
            next_sequence += 1;
        }
        all.extend(page_drafts);
    }
    all
}
