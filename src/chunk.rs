//! Sentence-boundary text chunker with overlap.
//!
//! Each page is split into sentences, which are packed greedily into chunks
//! of at most `max_tokens`. When a chunk is flushed, its trailing sentences
//! (up to `overlap_tokens`) are carried into the next chunk so that a clause
//! straddling a boundary is retrievable from either side. Chunks never span
//! pages, which keeps citations page-accurate.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Section titles longer than this are not treated as headings.
const MAX_HEADING_CHARS: usize = 80;

/// Estimated token count of a string.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Chunk every page of a document. Returns the chunks (indices contiguous
/// from 0 across the whole document) and the distinct section titles in the
/// order they were first seen.
pub fn chunk_pages(
    document_id: &str,
    pages: &[String],
    config: &ChunkingConfig,
) -> (Vec<Chunk>, Vec<String>) {
    let mut chunks = Vec::new();
    let mut sections: Vec<String> = Vec::new();
    let mut chunk_index: i64 = 0;

    for (page_idx, page_text) in pages.iter().enumerate() {
        if page_text.trim().is_empty() {
            continue;
        }
        let page_number = page_idx as i64 + 1;

        let section_title = detect_section_title(page_text);
        if let Some(ref title) = section_title {
            if !sections.contains(title) {
                sections.push(title.clone());
            }
        }

        let pieces = split_into_chunks(page_text, config.max_tokens, config.overlap_tokens);
        for (i, piece) in pieces.into_iter().enumerate() {
            let text = piece.trim();
            if text.is_empty() {
                continue;
            }
            chunks.push(Chunk {
                id: format!("{}_p{}_c{}", document_id, page_number, i),
                document_id: document_id.to_string(),
                chunk_index,
                page_number,
                section_title: section_title.clone(),
                text: text.to_string(),
                token_count: estimate_tokens(text) as i64,
            });
            chunk_index += 1;
        }
    }

    (chunks, sections)
}

/// Split text into overlapping chunks on sentence boundaries.
pub fn split_into_chunks(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for sentence in split_sentences(text) {
        let sentence_tokens = estimate_tokens(sentence);

        if sentence_tokens > max_tokens {
            // Oversized sentence: flush, then pack it word by word. The
            // unfinished tail becomes the start of the next chunk.
            if !current.is_empty() {
                chunks.push(current.join(" "));
                current.clear();
            }
            let mut words: Vec<String> = Vec::new();
            let mut words_tokens = 0usize;
            for word in sentence.split_whitespace() {
                let word_tokens = estimate_tokens(word) + 1;
                if words_tokens + word_tokens > max_tokens && !words.is_empty() {
                    chunks.push(words.join(" "));
                    words.clear();
                    words_tokens = 0;
                }
                words.push(word.to_string());
                words_tokens += word_tokens;
            }
            current = words;
            current_tokens = words_tokens;
        } else if current_tokens + sentence_tokens > max_tokens {
            chunks.push(current.join(" "));

            let mut overlap: Vec<String> = Vec::new();
            let mut overlap_count = 0usize;
            for s in current.iter().rev() {
                let s_tokens = estimate_tokens(s);
                if overlap_count + s_tokens > overlap_tokens {
                    break;
                }
                overlap.insert(0, s.clone());
                overlap_count += s_tokens;
            }

            overlap.push(sentence.to_string());
            current = overlap;
            current_tokens = overlap_count + sentence_tokens;
        } else {
            current.push(sentence.to_string());
            current_tokens += sentence_tokens;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Split on `.`, `!` or `?` followed by whitespace. Sentences are trimmed
/// and never empty.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    let s = text[start..end].trim();
                    if !s.is_empty() {
                        sentences.push(s);
                    }
                    start = end;
                }
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn markdown_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#+\s+(.+?)\s*$").expect("valid regex"))
}

fn bold_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*\*(.+?)\*\*").expect("valid regex"))
}

fn numbered_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*((?:ARTICLE|Article|SECTION|Section)\s+[0-9IVXLC]+(?:\.[0-9]+)*\b.*?)\s*$")
            .expect("valid regex")
    })
}

/// Best-effort section title for a page of text.
///
/// Tried in order: a Markdown header, a leading `**bold**` run, a numbered
/// `Article`/`Section` line, and finally a short all-caps line among the
/// first few lines of the page.
pub fn detect_section_title(text: &str) -> Option<String> {
    if let Some(cap) = markdown_heading().captures(text) {
        return Some(cap[1].trim().to_string());
    }
    if let Some(cap) = bold_heading().captures(text.trim_start()) {
        return Some(cap[1].trim().to_string());
    }
    if let Some(cap) = numbered_heading().captures(text) {
        let title = cap[1].trim();
        if title.chars().count() <= MAX_HEADING_CHARS {
            return Some(title.to_string());
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(5)
        .find(|l| is_caps_heading(l))
        .map(|l| l.to_string())
}

fn is_caps_heading(line: &str) -> bool {
    let len = line.chars().count();
    if !(4..=MAX_HEADING_CHARS).contains(&len) {
        return false;
    }
    let mut letters = 0;
    for c in line.chars() {
        if c.is_alphabetic() {
            if !c.is_uppercase() {
                return false;
            }
            letters += 1;
        }
    }
    letters >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_tokens: usize, overlap_tokens: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens,
            overlap_tokens,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_into_chunks("The lease is binding. Rent is due monthly.", 600, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "The lease is binding. Rent is due monthly.");
    }

    #[test]
    fn test_empty_text() {
        assert!(split_into_chunks("", 600, 100).is_empty());
        assert!(split_into_chunks("   \n  ", 600, 100).is_empty());
    }

    #[test]
    fn test_sentence_split_keeps_abbreviations_without_space() {
        let s = split_sentences("Pay $1.50 per unit. Then stop!  Done?");
        assert_eq!(s, vec!["Pay $1.50 per unit.", "Then stop!", "Done?"]);
    }

    #[test]
    fn test_overlap_carries_trailing_sentence() {
        // Each sentence is 20 chars => 5 tokens.
        let text = "Alpha sentence here. Bravo sentence her. Charlie sentence h. Delta sentence her.";
        let chunks = split_into_chunks(text, 10, 5);
        assert!(chunks.len() >= 2);
        // The last sentence of a chunk opens the following chunk.
        let first_last = chunks[0].rsplit(". ").next().unwrap().trim_end_matches('.');
        assert!(
            chunks[1].starts_with(first_last),
            "expected overlap, got {:?}",
            chunks
        );
    }

    #[test]
    fn test_no_overlap_when_zero() {
        let text = "Alpha sentence here. Bravo sentence her. Charlie sentence h.";
        let chunks = split_into_chunks(text, 5, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], "Bravo sentence her.");
    }

    #[test]
    fn test_oversized_sentence_split_on_words() {
        let long = (0..200).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = split_into_chunks(&long, 20, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(estimate_tokens(c) <= 25, "chunk too large: {}", c.len());
        }
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined, long);
    }

    #[test]
    fn test_chunk_pages_ids_and_indices() {
        let pages = vec![
            "# Definitions\n\nThe Tenant means the lessee.".to_string(),
            String::new(),
            "ARTICLE 5 TERMINATION\nEither party may terminate on notice.".to_string(),
        ];
        let (chunks, sections) = chunk_pages("doc1", &pages, &cfg(600, 100));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "doc1_p1_c0");
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!(chunks[1].id, "doc1_p3_c0");
        assert_eq!(chunks[1].page_number, 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.token_count > 0);
        }
        assert_eq!(sections, vec!["Definitions", "ARTICLE 5 TERMINATION"]);
    }

    #[test]
    fn test_detect_section_title_variants() {
        assert_eq!(
            detect_section_title("intro\n## Payment Terms\nbody").as_deref(),
            Some("Payment Terms")
        );
        assert_eq!(
            detect_section_title("**Governing Law** This agreement...").as_deref(),
            Some("Governing Law")
        );
        assert_eq!(
            detect_section_title("Preamble text\nSection 4.2 Indemnification\nThe party...")
                .as_deref(),
            Some("Section 4.2 Indemnification")
        );
        assert_eq!(
            detect_section_title("CONFIDENTIALITY\nEach party shall...").as_deref(),
            Some("CONFIDENTIALITY")
        );
        assert_eq!(detect_section_title("just a plain paragraph of text."), None);
    }

    #[test]
    fn test_deterministic() {
        let pages = vec!["One. Two. Three. Four. Five.".to_string()];
        let (a, _) = chunk_pages("d", &pages, &cfg(2, 1));
        let (b, _) = chunk_pages("d", &pages, &cfg(2, 1));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text, y.text);
        }
    }
}
