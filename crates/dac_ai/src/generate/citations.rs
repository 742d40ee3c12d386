use std::collections::BTreeSet;

const KINDS: &[&str] = &["chunk:", "analysis:"];

/// Evidence ids named by `[[chunk:...]]` or `[[analysis:...]]` markers in `text`.
/// Markers with an empty id or no closing `]]` are ignored. Each `]]` pairs with the
/// nearest `[[` before it, so a stray opener cannot swallow the marker that follows.
pub fn extract_cited_evidence_ids(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut rest = text;
    while let Some(open) = rest.find("[[") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("]]") else {
            break;
        };
        let span = &after_open[..close];
        let inner = match span.rfind("[[") {
            Some(last) => &span[last + 2..],
            None => span,
        }
        .trim();
        if let Some(kind) = KINDS.iter().find(|k| inner.starts_with(*k)) {
            let id = inner[kind.len()..].trim();
            if !id.is_empty() && !id.contains('[') {
                out.insert(format!("{kind}{id}"));
            }
        }
        rest = &after_open[close + 2..];
    }
    out
}
