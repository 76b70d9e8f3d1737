//! Line-window chunking with definition-aware break points

use crate::config::ChunkConfig;
use crate::error::Result;
use regex::Regex;

/// Priority levels for break points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakPriority {
    /// Line after a blank line
    Blank = 1,
    /// Function or method definition
    Function = 3,
    /// Type, class or module definition (highest)
    Type = 4,
}

/// A chunk of one file before it is fingerprinted
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    /// 1-based, inclusive
    pub start_line: usize,
    /// 1-based, inclusive
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub symbol: Option<String>,
    pub content: String,
}

/// Recognizes definition lines across common languages
pub struct SymbolMatcher {
    types: Regex,
    functions: Regex,
}

impl SymbolMatcher {
    pub fn new() -> Result<Self> {
        let types = Regex::new(
            r"^\s*(?:pub(?:\([^)]*\))?\s+|export\s+(?:default\s+)?|public\s+|private\s+|protected\s+|internal\s+|abstract\s+|final\s+|sealed\s+|static\s+|data\s+)*(?:class|struct|enum|trait|interface|impl(?:<[^>]*>)?|mod|module|type|object)\s+([A-Za-z_][A-Za-z0-9_]*)",
        )?;
        let functions = Regex::new(
            r"^\s*(?:pub(?:\([^)]*\))?\s+|export\s+(?:default\s+)?|public\s+|private\s+|protected\s+|static\s+|async\s+|unsafe\s+|const\s+|override\s+|suspend\s+)*(?:fn|def|func|function\*?|fun|sub)\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)",
        )?;
        Ok(Self { types, functions })
    }

    /// Break priority and defined name of a line, if it opens a definition
    pub fn classify(&self, line: &str) -> Option<(BreakPriority, String)> {
        if let Some(caps) = self.types.captures(line) {
            return Some((BreakPriority::Type, caps[1].to_string()));
        }
        self.functions
            .captures(line)
            .map(|caps| (BreakPriority::Function, caps[1].to_string()))
    }
}

/// Splits file content into overlapping line windows
pub struct LineChunker {
    max_lines: usize,
    max_bytes: usize,
    overlap_lines: usize,
    symbols: SymbolMatcher,
}

impl LineChunker {
    pub fn new(config: &ChunkConfig) -> Result<Self> {
        Ok(Self {
            max_lines: config.max_lines.max(1),
            max_bytes: config.max_bytes.max(1),
            overlap_lines: config.overlap_lines.min(config.max_lines.saturating_sub(1)),
            symbols: SymbolMatcher::new()?,
        })
    }

    pub fn chunk(&self, content: &str) -> Vec<ChunkSpan> {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut offsets = Vec::with_capacity(lines.len() + 1);
        let mut total = 0usize;
        offsets.push(0);
        for line in &lines {
            total += line.len();
            offsets.push(total);
        }

        let defs: Vec<Option<(BreakPriority, String)>> =
            lines.iter().map(|l| self.symbols.classify(l)).collect();

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < lines.len() {
            if offsets[start + 1] - offsets[start] > self.max_bytes {
                self.split_line(content, &offsets, &defs, start, &mut chunks);
                start += 1;
                continue;
            }

            let hard_end = self.hard_end(&offsets, start, lines.len());
            let mut end = hard_end;

            if end < lines.len() {
                let min_end = start + ((end - start) * 3 / 5).max(1);
                if let Some(cut) = find_boundary(&lines, &defs, min_end, end) {
                    end = cut;
                }
            }

            let text = &content[offsets[start]..offsets[end]];
            if !text.trim().is_empty() {
                chunks.push(ChunkSpan {
                    start_line: start + 1,
                    end_line: end,
                    start_byte: offsets[start],
                    end_byte: offsets[end],
                    symbol: enclosing_symbol(&defs, start, end),
                    content: text.to_string(),
                });
            }

            if end >= lines.len() {
                break;
            }
            let next = end.saturating_sub(self.overlap_lines);
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// Cuts a line longer than `max_bytes` into pieces on char boundaries
    fn split_line(
        &self,
        content: &str,
        offsets: &[usize],
        defs: &[Option<(BreakPriority, String)>],
        line: usize,
        chunks: &mut Vec<ChunkSpan>,
    ) {
        let symbol = enclosing_symbol(defs, line, line + 1);
        let line_end = offsets[line + 1];
        let mut from = offsets[line];

        while from < line_end {
            let mut to = (from + self.max_bytes).min(line_end);
            while !content.is_char_boundary(to) {
                to -= 1;
            }
            if to == from {
                // max_bytes is narrower than this char
                to = from + 1;
                while !content.is_char_boundary(to) {
                    to += 1;
                }
            }
            let text = &content[from..to];
            if !text.trim().is_empty() {
                chunks.push(ChunkSpan {
                    start_line: line + 1,
                    end_line: line + 1,
                    start_byte: from,
                    end_byte: to,
                    symbol: symbol.clone(),
                    content: text.to_string(),
                });
            }
            from = to;
        }
    }

    /// Largest end index within both the line and byte bounds, at least one line
    fn hard_end(&self, offsets: &[usize], start: usize, len: usize) -> usize {
        let mut end = start + 1;
        while end < len
            && end - start < self.max_lines
            && offsets[end + 1] - offsets[start] <= self.max_bytes
        {
            end += 1;
        }
        end
    }
}

/// Best cut index in `[min_end, max_end]`; the cut line starts the next chunk
///
/// Later cuts win ties so chunks stay as large as allowed.
fn find_boundary(
    lines: &[&str],
    defs: &[Option<(BreakPriority, String)>],
    min_end: usize,
    max_end: usize,
) -> Option<usize> {
    let mut best: Option<(BreakPriority, usize)> = None;

    for cut in min_end..=max_end.min(lines.len() - 1) {
        let priority = match &defs[cut] {
            Some((p, _)) => Some(*p),
            None if lines[cut - 1].trim().is_empty() => Some(BreakPriority::Blank),
            None => None,
        };
        if let Some(p) = priority {
            if best.map_or(true, |(bp, _)| p >= bp) {
                best = Some((p, cut));
            }
        }
    }

    best.map(|(_, cut)| cut)
}

/// Name of the last definition opened at or before the chunk's first line,
/// preferring one that opens inside the chunk
fn enclosing_symbol(
    defs: &[Option<(BreakPriority, String)>],
    start: usize,
    end: usize,
) -> Option<String> {
    if let Some((_, name)) = defs[start..end].iter().flatten().next() {
        return Some(name.clone());
    }
    defs[..start]
        .iter()
        .rev()
        .flatten()
        .next()
        .map(|(_, name)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_lines: usize, max_bytes: usize, overlap: usize) -> LineChunker {
        LineChunker::new(&ChunkConfig {
            max_lines,
            max_bytes,
            overlap_lines: overlap,
            ..ChunkConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_break_priority_ordering() {
        assert!(BreakPriority::Type > BreakPriority::Function);
        assert!(BreakPriority::Function > BreakPriority::Blank);
    }

    #[test]
    fn test_symbol_classification() {
        let m = SymbolMatcher::new().unwrap();
        assert_eq!(
            m.classify("pub fn parse_config(path: &Path) -> Config {"),
            Some((BreakPriority::Function, "parse_config".to_string()))
        );
        assert_eq!(
            m.classify("class ConfigParser:"),
            Some((BreakPriority::Type, "ConfigParser".to_string()))
        );
        assert_eq!(
            m.classify("export async function loadConfig(file) {"),
            Some((BreakPriority::Function, "loadConfig".to_string()))
        );
        assert_eq!(
            m.classify("func (p *Parser) Parse() error {"),
            Some((BreakPriority::Function, "Parse".to_string()))
        );
        assert_eq!(m.classify("    let x = 1;"), None);
    }

    #[test]
    fn test_small_file_is_one_chunk() {
        let content = "def a():\n    return 1\n";
        let chunks = chunker(120, 6000, 10).chunk(content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[0].end_byte, content.len());
        assert_eq!(chunks[0].symbol.as_deref(), Some("a"));
    }

    #[test]
    fn test_respects_line_and_byte_bounds() {
        let content: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        for chunk in chunker(10, 6000, 2).chunk(&content) {
            assert!(chunk.end_line - chunk.start_line < 10);
        }
        for chunk in chunker(120, 64, 0).chunk(&content) {
            assert!(chunk.content.len() <= 64);
        }

        let long = format!("fn a() {{}}\n{}\nfn b() {{}}\n", "x".repeat(10_000));
        let chunks = chunker(120, 6000, 2).chunk(&long);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 6000, "{} bytes", chunk.content.len());
            assert_eq!(&long[chunk.start_byte..chunk.end_byte], chunk.content);
        }
        assert_eq!(chunks.iter().filter(|c| c.start_line == 2).count(), 2);
        assert_eq!(chunks.last().unwrap().end_line, 3);
    }

    #[test]
    fn test_long_line_splits_on_char_boundaries() {
        let content = "é".repeat(40);
        let chunks = chunker(10, 7, 0).chunk(&content);
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, content);
        assert!(chunks.iter().all(|c| c.content.len() <= 7));
    }

    #[test]
    fn test_prefers_definition_boundary() {
        let mut content = String::new();
        for i in 0..7 {
            content.push_str(&format!("x{} = {}\n", i, i));
        }
        content.push_str("def second():\n    pass\n    pass\n    pass\n");
        let chunks = chunker(10, 6000, 0).chunk(&content);
        assert_eq!(chunks[0].end_line, 7);
        assert_eq!(chunks[1].start_line, 8);
        assert_eq!(chunks[1].symbol.as_deref(), Some("second"));
    }

    #[test]
    fn test_overlap_and_full_coverage() {
        let content: String = (0..50).map(|i| format!("v{}\n", i)).collect();
        let chunks = chunker(10, 6000, 3).chunk(&content);
        assert_eq!(chunks.first().unwrap().start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 50);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
            assert!(pair[1].start_line > pair[0].start_line);
        }
    }

    #[test]
    fn test_byte_offsets_match_content() {
        let content = "fn a() {}\n\nfn b() {}\n";
        let chunks = chunker(1, 6000, 0).chunk(content);
        for chunk in &chunks {
            assert_eq!(&content[chunk.start_byte..chunk.end_byte], chunk.content);
        }
    }
}
