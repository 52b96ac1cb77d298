//! Persona-line filtering.
//!
//! The style reference shown to the generator contains only the "self"
//! persona's lines, so the model imitates one voice rather than both.

/// Keep only the lines of `doc` that start with `"<label>:"`, in order.
///
/// ```rust
/// use persona_harness_core::persona::persona_lines;
///
/// let doc = "A: hi\nB: hey\nA: you up?";
/// assert_eq!(persona_lines(doc, "A"), "A: hi\nA: you up?");
/// ```
pub fn persona_lines(doc: &str, label: &str) -> String {
    let prefix = format!("{}:", label);
    doc.lines()
        .filter(|line| line.starts_with(&prefix))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Persona lines across several documents, in document order, trimmed.
///
/// Documents without any persona line contribute nothing, not even a blank
/// separator line.
pub fn style_reference<'a, I>(docs: I, label: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    docs.into_iter()
        .map(|doc| persona_lines(doc, label))
        .filter(|lines| !lines.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
