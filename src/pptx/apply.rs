use std::collections::HashMap;

use anyhow::{anyhow, Context};

use crate::ir::{Paragraph, RunNodeRef};
use crate::textutil::same_text;

use super::extract::LoadedSlide;
use super::xml::{is_text_tag, XmlEvent, XmlPart};

/// Splits a translated sentence over a paragraph's runs by each run's share
/// of the source characters. Returns `None` when the paragraph should be left
/// untouched (blank translation, or the translation equals the source).
///
/// Every run but the last gets at least one word while words remain; the
/// last run takes whatever is left. A run is followed by a space when it had
/// one in the source or when more words follow it.
pub fn redistribute(paragraph: &Paragraph, translated: &str) -> Option<Vec<String>> {
    let translated = translated.trim();
    if translated.is_empty() || paragraph.runs.is_empty() {
        return None;
    }
    if same_text(translated, &paragraph.full_text()) {
        return None;
    }
    if paragraph.runs.len() == 1 {
        return Some(vec![translated.to_string()]);
    }

    let words: Vec<&str> = translated.split_whitespace().collect();
    let word_count = words.len();
    let total = paragraph.total_length();
    let last = paragraph.runs.len() - 1;

    let mut out = Vec::with_capacity(paragraph.runs.len());
    let mut pos = 0usize;
    for (i, run) in paragraph.runs.iter().enumerate() {
        let remaining = word_count - pos;
        let take = if i == last {
            remaining
        } else {
            let proportion = if total == 0 {
                0.0
            } else {
                run.length as f64 / total as f64
            };
            let share = (proportion * word_count as f64).round() as usize;
            share.max(1).min(remaining)
        };
        let end = pos + take;
        let mut text = words[pos..end].join(" ");
        pos = end;
        if !text.is_empty() && (run.trailing_space || pos < word_count) {
            text.push(' ');
        }
        out.push(text);
    }
    Some(out)
}

/// Writes a paragraph's translation into its text nodes. Returns whether any
/// node changed.
pub fn apply_paragraph_translation(
    part: &mut XmlPart,
    paragraph: &Paragraph,
    translated: &str,
) -> anyhow::Result<bool> {
    let Some(texts) = redistribute(paragraph, translated) else {
        return Ok(false);
    };
    for (run, text) in paragraph.runs.iter().zip(texts.iter()) {
        apply_node_text(part, &run.node_ref, text)
            .with_context(|| format!("apply run text in {}", paragraph.scope_key))?;
    }
    Ok(true)
}

/// Applies the translation map to every paragraph of a slide. Paragraphs
/// whose sentence has no translation are skipped. Returns the number of
/// paragraphs rewritten.
pub fn apply_slide_translations(
    slide: &mut LoadedSlide,
    translations: &HashMap<String, String>,
) -> anyhow::Result<usize> {
    let mut changed = 0usize;
    for paragraph in &slide.text.paragraphs {
        let Some(translated) = translations.get(&paragraph.full_text()) else {
            continue;
        };
        if apply_paragraph_translation(&mut slide.part, paragraph, translated)? {
            changed += 1;
        }
    }
    Ok(changed)
}

pub fn apply_node_text(
    part: &mut XmlPart,
    node_ref: &RunNodeRef,
    node_text: &str,
) -> anyhow::Result<()> {
    if node_ref.part_name != part.name {
        return Err(anyhow!(
            "run belongs to {} but part is {}",
            node_ref.part_name,
            part.name
        ));
    }
    let opens_text = matches!(
        part.events.get(node_ref.elem_event_index),
        Some(XmlEvent::Start { name, .. }) if is_text_tag(name)
    );
    if !opens_text || node_ref.text_event_index <= node_ref.elem_event_index {
        return Err(anyhow!(
            "no text element at {} in {}",
            node_ref.elem_event_index,
            part.name
        ));
    }
    match part.events.get_mut(node_ref.text_event_index) {
        Some(XmlEvent::Text { text }) => {
            *text = node_text.to_string();
            Ok(())
        }
        _ => Err(anyhow!(
            "expected Text event at {} in {}",
            node_ref.text_event_index,
            part.name
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{apply_node_text, apply_paragraph_translation, apply_slide_translations, redistribute};
    use crate::ir::{test_paragraph, RunNodeRef};
    use crate::pptx::extract::{extract_paragraphs, LoadedSlide};
    use crate::pptx::xml::{parse_xml_part, serialize_slide_part};

    fn strip_joined(parts: &[String]) -> String {
        parts.concat().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn identity_translation_leaves_runs_alone() {
        let p = test_paragraph(&["Hello ", "World"]);
        assert!(redistribute(&p, "hello world").is_none());
        assert!(redistribute(&p, "   ").is_none());
    }

    #[test]
    fn single_run_takes_everything() {
        let p = test_paragraph(&["Bonjour"]);
        let out = redistribute(&p, "Good morning everyone").expect("changed");
        assert_eq!(out, vec!["Good morning everyone".to_string()]);
    }

    #[test]
    fn words_are_conserved_for_two_and_more_runs() {
        let cases: &[(&[&str], &str)] = &[
            (&["Primera ", "parte"], "First part of the sentence"),
            (&["a", "bb ", "ccc ", "dddd"], "one two three four five six seven"),
            (&["x", "y", "z", "w", "v"], "only two"),
            (&["long run here ", "s"], "single"),
        ];
        for (runs, translated) in cases {
            let p = test_paragraph(runs);
            let out = redistribute(&p, translated).expect("changed");
            assert_eq!(out.len(), runs.len());
            assert_eq!(strip_joined(&out), *translated);
            assert_eq!(out.concat().trim_end(), *translated);
        }
    }

    #[test]
    fn shares_follow_character_proportions() {
        let p = test_paragraph(&["a", "bcd"]);
        let translated = "w1 w2 w3 w4 w5 w6 w7 w8 w9 w10 w11 w12";
        let out = redistribute(&p, translated).expect("changed");
        assert_eq!(out[0], "w1 w2 w3 ");
        assert_eq!(out[1], "w4 w5 w6 w7 w8 w9 w10 w11 w12");
    }

    #[test]
    fn short_translation_leaves_trailing_runs_empty() {
        let p = test_paragraph(&["Hel", "lo wor", "ld"]);
        let out = redistribute(&p, "Hola mundo amigo").expect("changed");
        assert_eq!(out, vec!["Hola ".to_string(), "mundo amigo".to_string(), String::new()]);
        assert_eq!(out.concat(), "Hola mundo amigo");
    }

    #[test]
    fn source_trailing_space_is_kept() {
        let p = test_paragraph(&["Uno ", "dos "]);
        let out = redistribute(&p, "One two").expect("changed");
        assert_eq!(out, vec!["One ".to_string(), "two ".to_string()]);
    }

    #[test]
    fn applied_text_lands_in_the_right_nodes() {
        let xml = r#"<p:sld><a:p><a:r><a:rPr b="1"/><a:t>Hola </a:t></a:r><a:r><a:t>mundo</a:t></a:r></a:p><a:p><a:r><a:t>Sin cambio</a:t></a:r></a:p></p:sld>"#;
        let part = parse_xml_part("ppt/slides/slide1.xml", xml.as_bytes()).expect("parse");
        let paragraphs = extract_paragraphs(&part);
        let mut slide = LoadedSlide {
            path: std::path::PathBuf::from("slide1.xml"),
            text: crate::ir::SlideText {
                index: 1,
                part_name: part.name.clone(),
                paragraphs,
            },
            part,
        };

        let mut map = HashMap::new();
        map.insert("Hola mundo".to_string(), "Hello world".to_string());
        map.insert("Sin cambio".to_string(), "sin cambio".to_string());
        let changed = apply_slide_translations(&mut slide, &map).expect("apply");
        assert_eq!(changed, 1);

        let out = String::from_utf8(serialize_slide_part(&slide.part).expect("serialize")).expect("utf8");
        assert!(out.contains(r#"<a:rPr b="1"/><a:t>Hello </a:t>"#));
        assert!(out.contains("<a:t>world</a:t>"));
        assert!(out.contains("<a:t>Sin cambio</a:t>"));
    }

    #[test]
    fn runs_from_another_part_are_rejected() {
        let xml = r#"<p:sld><a:p><a:r><a:t>Hola</a:t></a:r></a:p></p:sld>"#;
        let mut part = parse_xml_part("ppt/slides/slide9.xml", xml.as_bytes()).expect("parse");
        let p = test_paragraph(&["Hola"]);
        assert!(apply_paragraph_translation(&mut part, &p, "Hello").is_err());
    }

    #[test]
    fn node_ref_must_point_at_a_text_element() {
        let xml = r#"<p:sld><a:p><a:r><a:t>Hola</a:t></a:r></a:p></p:sld>"#;
        let mut part = parse_xml_part("ppt/slides/slide1.xml", xml.as_bytes()).expect("parse");
        let mut node = RunNodeRef {
            part_name: "ppt/slides/slide1.xml".to_string(),
            elem_event_index: 2,
            text_event_index: 4,
            original_text: "Hola".to_string(),
        };
        assert!(apply_node_text(&mut part, &node, "Hello").is_err());

        node.elem_event_index = 3;
        apply_node_text(&mut part, &node, "Hello").expect("apply");
        let out = String::from_utf8(serialize_slide_part(&part).expect("serialize")).expect("utf8");
        assert!(out.contains("<a:t>Hello</a:t>"));
    }
}
