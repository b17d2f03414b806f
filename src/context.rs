//! Citation-context assembly for grounded answers.
//!
//! Retrieved passages arrive ranked by the index but may repeat the same
//! physical page under several chunk ids. [`build_context`] deduplicates
//! on `(product_id, page_number)`, assigns dense first-seen citation
//! ranks starting at 1, strips markup out of the chunk text, and renders
//! the ordered message fragments the generator sends to the model.
//!
//! The builder is pure: the same chunk list always produces the same
//! ranks and the same rendered text.

use std::collections::HashSet;

use crate::models::{CitationNode, RetrievedChunk};

/// Ordered context fragments plus the citation nodes they were rendered
/// from. Fragment order is rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBundle {
    pub nodes: Vec<CitationNode>,
    pub fragments: Vec<String>,
}

/// Deduplicate, rank, sanitize, and render retrieved chunks.
///
/// When `with_citations` is set, each fragment is wrapped in
/// `<Text Document Index: N>` markers so the model can emit `<ref:N>`
/// references that map back to the node with rank `N`.
pub fn build_context(chunks: &[RetrievedChunk], with_citations: bool) -> ContextBundle {
    let mut seen: HashSet<(String, i64)> = HashSet::new();
    let mut nodes: Vec<CitationNode> = Vec::new();

    let mut rank: u32 = 1;
    for chunk in chunks {
        if !seen.insert(chunk.dedup_key()) {
            continue;
        }
        nodes.push(CitationNode {
            rank,
            text: strip_markup(&chunk.text),
            product_id: chunk.product_id.clone(),
            file_id: chunk.file_id.clone(),
            advisor_id: chunk.advisor_id.clone(),
            product_name: chunk.product_name.clone(),
            page_number: chunk.page_number,
        });
        rank += 1;
    }

    let fragments = nodes
        .iter()
        .map(|node| {
            if with_citations {
                format!(
                    "<Text Document Index: {}>\n{}\n</Text Document Index: {}>",
                    node.rank, node.text, node.rank
                )
            } else {
                node.text.clone()
            }
        })
        .collect();

    ContextBundle { nodes, fragments }
}

/// Reduce possibly-HTML-contaminated chunk text to plain text.
///
/// Runs the quick-xml event reader over the input and keeps only text
/// and CDATA nodes, with end-name checking off so orphaned tags do not
/// fail the scan. Input that cannot be scanned at all (stray `<` in
/// prose, for instance) is returned unchanged rather than truncated.
pub fn strip_markup(raw: &str) -> String {
    if !raw.contains('<') {
        return raw.to_string();
    }

    let mut reader = quick_xml::Reader::from_str(raw);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.trim_text(false);

    let mut out = String::new();
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Text(t)) => match t.unescape() {
                Ok(text) => out.push_str(&text),
                Err(_) => out.push_str(&String::from_utf8_lossy(&t)),
            },
            Ok(quick_xml::events::Event::CData(c)) => {
                out.push_str(&String::from_utf8_lossy(&c));
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return raw.to_string(),
        }
    }
    out
}
