//! Terminal rendering of answers, citations, and document listings.
//!
//! Styling goes through `console`, which drops ANSI codes automatically
//! when stdout is not a terminal.

use console::style;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

use crate::chat::{ChatMessage, RelevanceBand};
use crate::models::{
    Citation, Confidence, DocumentDetailResponse, DocumentListResponse, QueryUsage,
};

const SNIPPET_DISPLAY_CHARS: usize = 200;

/// Renders Markdown for a plain terminal: emphasis as bold/italic, inline
/// code in cyan, list items as bullets or numbers.
pub fn render_markdown(text: &str) -> String {
    let mut out = String::new();
    let mut bold = 0usize;
    let mut italic = 0usize;
    let mut in_code_block = false;
    let mut lists: Vec<Option<u64>> = Vec::new();

    for event in Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH) {
        match event {
            Event::Start(Tag::Heading { .. }) | Event::Start(Tag::Strong) => bold += 1,
            Event::End(TagEnd::Heading(_)) => {
                bold = bold.saturating_sub(1);
                out.push_str("\n\n");
            }
            Event::End(TagEnd::Strong) => bold = bold.saturating_sub(1),
            Event::Start(Tag::Emphasis) => italic += 1,
            Event::End(TagEnd::Emphasis) => italic = italic.saturating_sub(1),
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push('\n');
            }
            Event::Start(Tag::List(start)) => lists.push(start),
            Event::End(TagEnd::List(_)) => {
                lists.pop();
                if lists.is_empty() {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                out.push_str(&"  ".repeat(lists.len().saturating_sub(1)));
                match lists.last_mut() {
                    Some(Some(n)) => {
                        out.push_str(&format!("{}. ", n));
                        *n += 1;
                    }
                    _ => out.push_str("• "),
                }
            }
            Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if lists.is_empty() {
                    out.push_str("\n\n");
                } else {
                    out.push('\n');
                }
            }
            Event::Text(t) => {
                let mut s = style(t.to_string());
                if bold > 0 {
                    s = s.bold();
                }
                if italic > 0 {
                    s = s.italic();
                }
                if in_code_block {
                    s = s.cyan();
                }
                out.push_str(&s.to_string());
            }
            Event::Code(t) => out.push_str(&style(t.to_string()).cyan().to_string()),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str("────────\n\n"),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

pub fn confidence_badge(confidence: Confidence) -> String {
    let label = format!("[{} confidence]", confidence.as_str().to_uppercase());
    match confidence {
        Confidence::High => style(label).green().bold().to_string(),
        Confidence::Medium => style(label).yellow().bold().to_string(),
        Confidence::Low => style(label).red().bold().to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut s: String = text.chars().take(max).collect();
    s.push('…');
    s
}

pub fn render_citations(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut out = format!("{}\n", style("Sources:").bold());
    for (i, c) in citations.iter().enumerate() {
        let band = RelevanceBand::from_score(c.relevance_score);
        let relevance = style(format!(
            "relevance {:.2} ({})",
            c.relevance_score,
            band.label()
        ))
        .fg(band.color());
        let section = c
            .section_title
            .as_deref()
            .map(|s| format!(" · {}", s))
            .unwrap_or_default();
        out.push_str(&format!(
            "  [{}] {}, p.{}{}  {}\n",
            i + 1,
            c.document_title,
            c.page_number,
            section,
            relevance
        ));
        out.push_str(&format!(
            "      {}\n",
            style(format!(
                "\"{}\"",
                truncate_chars(c.text_snippet.trim(), SNIPPET_DISPLAY_CHARS)
            ))
            .dim()
        ));
    }
    out
}

pub fn render_usage(usage: &QueryUsage) -> String {
    let mut parts = vec![
        format!(
            "tokens {} in / {} out",
            usage.llm_input_tokens, usage.llm_output_tokens
        ),
        format!("cost ${:.4}", usage.estimated_cost_usd),
    ];
    if let Some(ref t) = usage.timing {
        parts.push(format!(
            "{} ms (embed {} · search {} · llm {})",
            t.total_ms, t.embedding_ms, t.search_ms, t.llm_ms
        ));
    }
    style(parts.join("  ·  ")).dim().to_string()
}

pub fn render_message(message: &ChatMessage) -> String {
    match message {
        ChatMessage::User { content } => {
            format!("{} {}", style("You:").cyan().bold(), content)
        }
        ChatMessage::Assistant {
            content,
            citations,
            confidence,
            usage,
            warning,
        } => {
            let mut out = format!(
                "{} {}\n",
                style("Assistant").magenta().bold(),
                confidence_badge(*confidence)
            );
            if let Some(w) = warning {
                out.push_str(&format!("{}\n", style(format!("⚠ {}", w)).yellow()));
            }
            out.push('\n');
            out.push_str(&render_markdown(content));
            out.push_str("\n\n");
            out.push_str(&render_citations(citations));
            if let Some(u) = usage {
                out.push_str(&render_usage(u));
                out.push('\n');
            }
            out
        }
        ChatMessage::Error {
            message,
            partial_citations,
        } => {
            let mut out = format!("{} {}\n", style("Error:").red().bold(), message);
            if !partial_citations.is_empty() {
                out.push_str(&format!(
                    "{}\n",
                    style("Closest passages found:").dim()
                ));
                out.push_str(&render_citations(partial_citations));
            }
            out
        }
    }
}

pub fn render_document_list(list: &DocumentListResponse, max_documents: Option<usize>) -> String {
    let count = match max_documents {
        Some(max) => format!("{}/{}", list.total, max),
        None => list.total.to_string(),
    };
    let mut out = format!("{} ({})\n", style("Documents").bold(), count);
    if list.documents.is_empty() {
        out.push_str("  No documents uploaded yet.\n");
    }
    for d in &list.documents {
        out.push_str(&format!(
            "  {}  {}  {} pages · {} chunks · {}\n",
            style(&d.id).dim(),
            d.title,
            d.page_count,
            d.chunk_count,
            d.uploaded_at.format("%Y-%m-%d %H:%M")
        ));
    }
    if list.limit_reached {
        out.push_str(&format!(
            "{}\n",
            style("Document limit reached. Delete a document before uploading another.").yellow()
        ));
    }
    out
}

pub fn render_document_detail(doc: &DocumentDetailResponse) -> String {
    let mut out = format!(
        "{}\n  id: {}\n  pages: {} · chunks: {} · uploaded {}\n",
        style(&doc.title).bold(),
        doc.id,
        doc.page_count,
        doc.chunks.len(),
        doc.uploaded_at.format("%Y-%m-%d %H:%M")
    );
    if !doc.sections.is_empty() {
        out.push_str(&format!("  sections: {}\n", doc.sections.join("; ")));
    }
    for c in &doc.chunks {
        out.push_str(&format!(
            "  p.{:<4} {:>4} tok  {}\n",
            c.page_number,
            c.token_count,
            style(&c.preview).dim()
        ));
    }
    out
}
