use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, warn};

use crate::ir::{Paragraph, Run, RunNodeRef, SlideError, SlideText};

use super::package::SlidePartFile;
use super::xml::{is_text_tag, parse_xml_part, XmlEvent, XmlPart};

/// A slide that parsed cleanly, kept together with its event list so
/// translations can be written back into the same nodes.
pub struct LoadedSlide {
    pub path: PathBuf,
    pub part: XmlPart,
    pub text: SlideText,
}

/// Everything extracted from a deck: the parsed slides, the unique sentence
/// keys in first-seen order and the slides that failed to parse.
pub struct DeckText {
    pub slides: Vec<LoadedSlide>,
    pub sentences: Vec<String>,
    pub errors: Vec<SlideError>,
}

impl DeckText {
    pub fn paragraph_count(&self) -> usize {
        self.slides.iter().map(|s| s.text.paragraphs.len()).sum()
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len() + self.errors.len()
    }
}

/// Collects the paragraphs of one slide part. Every `<a:t>` under an `<a:p>`
/// becomes a run unless its text is blank; paragraphs without runs are dropped.
pub fn extract_paragraphs(part: &XmlPart) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();

    let mut p_start: Option<usize> = None;
    let mut runs: Vec<Run> = Vec::new();
    let mut current_text_elem: Option<usize> = None;
    let mut text_seen = false;

    for (idx, ev) in part.events.iter().enumerate() {
        match ev {
            XmlEvent::Start { name, .. } => {
                let name_s = name.as_str();
                if name_s == "a:p" {
                    p_start = Some(idx);
                    runs.clear();
                } else if p_start.is_some() && is_text_tag(name_s) {
                    current_text_elem = Some(idx);
                    text_seen = false;
                }
            }
            XmlEvent::End { name } => {
                let name_s = name.as_str();
                if name_s == "a:p" {
                    if let Some(start) = p_start.take() {
                        finalize_paragraph(&mut paragraphs, part, start, &mut runs);
                    }
                } else if is_text_tag(name_s) {
                    current_text_elem = None;
                }
            }
            XmlEvent::Text { text } => {
                let Some(elem_idx) = current_text_elem else {
                    continue;
                };
                if text_seen {
                    continue;
                }
                text_seen = true;
                let node_ref = RunNodeRef {
                    part_name: part.name.clone(),
                    elem_event_index: elem_idx,
                    text_event_index: idx,
                    original_text: text.clone(),
                };
                if let Some(run) = Run::from_node(node_ref) {
                    runs.push(run);
                }
            }
            _ => {}
        }
    }

    paragraphs
}

fn finalize_paragraph(
    paragraphs: &mut Vec<Paragraph>,
    part: &XmlPart,
    start_idx: usize,
    runs: &mut Vec<Run>,
) {
    if runs.is_empty() {
        return;
    }
    paragraphs.push(Paragraph {
        part_name: part.name.clone(),
        scope_key: format!("{}#a:p@{}", part.name, start_idx),
        runs: std::mem::take(runs),
    });
}

/// Parses one slide part from disk.
pub fn load_slide(slide: &SlidePartFile) -> anyhow::Result<LoadedSlide> {
    let bytes =
        fs::read(&slide.path).with_context(|| format!("read slide: {}", slide.path.display()))?;
    let part = parse_xml_part(&slide.name, &bytes)
        .with_context(|| format!("parse slide xml: {}", slide.name))?;
    let paragraphs = extract_paragraphs(&part);
    Ok(LoadedSlide {
        path: slide.path.clone(),
        text: SlideText {
            index: slide.index,
            part_name: slide.name.clone(),
            paragraphs,
        },
        part,
    })
}

/// Loads every slide in order. A slide that cannot be read or parsed is
/// recorded in `errors` and skipped; the remaining slides are still loaded.
pub fn extract_deck_text(slides: &[SlidePartFile]) -> DeckText {
    let mut loaded = Vec::with_capacity(slides.len());
    let mut errors = Vec::new();
    for slide in slides {
        match load_slide(slide) {
            Ok(s) => {
                debug!(
                    slide = slide.index,
                    paragraphs = s.text.paragraphs.len(),
                    "slide loaded"
                );
                loaded.push(s);
            }
            Err(e) => {
                warn!(slide = slide.index, part = %slide.name, error = %format!("{e:#}"), "slide skipped");
                errors.push(SlideError {
                    index: slide.index,
                    part_name: slide.name.clone(),
                    message: format!("{e:#}"),
                });
            }
        }
    }
    let sentences = unique_sentences(loaded.iter().map(|s| &s.text));
    DeckText {
        slides: loaded,
        sentences,
        errors,
    }
}

/// Sentence keys across all slides, duplicates removed, first occurrence wins.
pub fn unique_sentences<'a>(slides: impl IntoIterator<Item = &'a SlideText>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for slide in slides {
        for p in &slide.paragraphs {
            let key = p.full_text();
            if key.is_empty() {
                continue;
            }
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
    }
    out
}

#[derive(Serialize)]
struct ParagraphReport {
    text: String,
    runs: Vec<String>,
}

#[derive(Serialize)]
struct SlideReport {
    index: u32,
    part_name: String,
    paragraphs: Vec<ParagraphReport>,
}

#[derive(Serialize)]
struct DeckTextReport<'a> {
    sentences: &'a [String],
    slides: Vec<SlideReport>,
    errors: &'a [SlideError],
}

pub fn write_text_report(deck: &DeckText, path: &Path) -> anyhow::Result<()> {
    let slides = deck
        .slides
        .iter()
        .map(|s| SlideReport {
            index: s.text.index,
            part_name: s.text.part_name.clone(),
            paragraphs: s
                .text
                .paragraphs
                .iter()
                .map(|p| ParagraphReport {
                    text: p.full_text(),
                    runs: p.runs.iter().map(|r| r.node_ref.original_text.clone()).collect(),
                })
                .collect(),
        })
        .collect();
    let report = DeckTextReport {
        sentences: &deck.sentences,
        slides,
        errors: &deck.errors,
    };
    let json = serde_json::to_string_pretty(&report).context("serialize text report")?;
    fs::write(path, json).with_context(|| format!("write text report: {}", path.display()))?;
    Ok(())
}
