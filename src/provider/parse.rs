use once_cell::sync::Lazy;
use regex::Regex;

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\[(\d+)\][ \t]*").expect("marker regex"));
static LEADING_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[\d+\]\s*").expect("leading marker regex"));
static BLANK_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("blank line"));

/// How much the reply followed the requested `[i] text` format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseQuality {
    /// Every index from 1 to N appeared as a marker.
    Structured,
    /// Markers were incomplete but the reply had exactly N non-empty lines.
    LineFallback,
    /// Neither pass matched N; missing slots are empty strings.
    Adjusted { expected: usize, parsed: usize },
}

impl ParseQuality {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Structured)
    }
}

#[derive(Clone, Debug)]
pub struct ParsedResponse {
    /// One entry per requested sentence, in request order. Empty means missing.
    pub translations: Vec<String>,
    pub quality: ParseQuality,
}

/// Extracts `expected` translations from a numbered reply. Never fails: a
/// reply that cannot be fully matched is padded or truncated and tagged.
pub fn parse_numbered_response(text: &str, expected: usize) -> ParsedResponse {
    let text = strip_fences(text);

    let blocks = numbered_blocks(&text, expected);
    let found = blocks.iter().filter(|b| b.is_some()).count();
    if found == expected {
        return ParsedResponse {
            translations: blocks.into_iter().map(Option::unwrap_or_default).collect(),
            quality: ParseQuality::Structured,
        };
    }

    let lines: Vec<String> = text
        .lines()
        .map(|l| clean_block(&LEADING_MARKER_RE.replace(l, "")))
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() == expected {
        return ParsedResponse {
            translations: lines,
            quality: ParseQuality::LineFallback,
        };
    }

    if found > 0 {
        return ParsedResponse {
            translations: blocks.into_iter().map(Option::unwrap_or_default).collect(),
            quality: ParseQuality::Adjusted {
                expected,
                parsed: found,
            },
        };
    }
    let parsed = lines.len();
    let mut translations = lines;
    translations.truncate(expected);
    translations.resize(expected, String::new());
    ParsedResponse {
        translations,
        quality: ParseQuality::Adjusted { expected, parsed },
    }
}

/// Marker-anchored pass. Slot `i - 1` holds the first non-empty block for
/// marker `[i]`; markers outside `1..=expected` are ignored.
fn numbered_blocks(text: &str, expected: usize) -> Vec<Option<String>> {
    let mut slots: Vec<Option<String>> = vec![None; expected];
    let markers: Vec<(usize, usize, usize)> = MARKER_RE
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let idx = c.get(1)?.as_str().parse::<usize>().ok()?;
            Some((idx, whole.start(), whole.end()))
        })
        .collect();

    for (k, (idx, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers.get(k + 1).map(|m| m.1).unwrap_or(text.len());
        if *idx == 0 || *idx > expected || slots[idx - 1].is_some() {
            continue;
        }
        let block = clean_block(&text[*body_start..body_end]);
        if !block.is_empty() {
            slots[idx - 1] = Some(block);
        }
    }
    slots
}

fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .replace("```", "")
}

/// Cuts a block at its first blank line, folds the remaining lines into one
/// and removes wrapping quotes.
fn clean_block(raw: &str) -> String {
    let head = BLANK_LINE_RE.split(raw).next().unwrap_or("");
    let joined = head.split_whitespace().collect::<Vec<_>>().join(" ");
    strip_wrapping_quotes(&joined).to_string()
}

const QUOTE_PAIRS: [(char, char); 3] = [('"', '"'), ('\u{201C}', '\u{201D}'), ('\u{00AB}', '\u{00BB}')];

fn wrapping_pair(s: &str) -> Option<((char, char), &str)> {
    QUOTE_PAIRS.iter().find_map(|&(open, close)| {
        s.strip_prefix(open)
            .and_then(|r| r.strip_suffix(close))
            .map(|inner| ((open, close), inner))
    })
}

fn strip_wrapping_quotes(s: &str) -> &str {
    match wrapping_pair(s) {
        Some((_, inner)) => inner.trim(),
        None => s,
    }
}

/// Puts back the quote pair that wraps `source` when the parsed translation
/// lost it. Empty slots stay empty.
pub fn restore_source_quotes(source: &str, translation: String) -> String {
    if translation.is_empty() || wrapping_pair(&translation).is_some() {
        return translation;
    }
    match wrapping_pair(source.trim()) {
        Some(((open, close), _)) => format!("{open}{translation}{close}"),
        None => translation,
    }
}
