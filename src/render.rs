//! Markdown rendering of assembled passages.

use crate::model::Passage;

/// Separator between rendered passages in the response body.
pub const PASSAGE_SEPARATOR: &str = "\n---\n\n";

/// Renders one passage as a markdown block with title and attribution.
pub fn render_passage(passage: &Passage) -> String {
    let mut out = String::new();
    if !passage.title.is_empty() {
        out.push_str("### ");
        out.push_str(&passage.title);
        out.push_str("\n\n");
    }
    out.push_str(&passage.sentences.join(" "));
    if !passage.attribution.is_empty() {
        out.push_str("\n\n*Source: ");
        out.push_str(&passage.attribution);
        out.push('*');
    }
    out
}

/// Joins rendered passages into the markdown response body.
pub fn join_rendered(rendered: &[String]) -> String {
    rendered.join(PASSAGE_SEPARATOR)
}
