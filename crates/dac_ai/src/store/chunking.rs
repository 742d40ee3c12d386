use dac_core::config::IngestConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub ordinal: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for ChunkingConfig {
    fn from(cfg: &IngestConfig) -> Self {
        Self {
            max_chars: cfg.chunk_max_chars.max(1),
            overlap_chars: cfg.chunk_overlap_chars.min(cfg.chunk_max_chars.saturating_sub(1)),
        }
    }
}

pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Splits one oversized paragraph into windows of `max_chars` characters, each starting
/// `max_chars - overlap_chars` after the previous one.
fn split_long(p: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = p.chars().collect();
    let step = max_chars.saturating_sub(overlap_chars).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

/// Packs blank-line separated paragraphs into chunks of at most `max_chars` characters.
/// Paragraphs longer than the ceiling are windowed with overlap and never share a chunk.
pub fn chunk_text(text: &str, cfg: ChunkingConfig) -> Vec<ChunkDraft> {
    let normalized = normalize_text(text);
    let paras: Vec<&str> = normalized
        .split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();

    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;
    for p in paras {
        let p_len = char_len(p);
        if p_len > cfg.max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            pieces.extend(split_long(p, cfg.max_chars, cfg.overlap_chars));
            continue;
        }
        let add_len = if buf.is_empty() { p_len } else { 2 + p_len };
        if !buf.is_empty() && buf_len + add_len > cfg.max_chars {
            pieces.push(std::mem::take(&mut buf));
            buf_len = 0;
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
            buf_len += 2;
        }
        buf.push_str(p);
        buf_len += p_len;
    }
    if !buf.trim().is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| ChunkDraft {
            ordinal: i as u32,
            text,
        })
        .collect()
}
