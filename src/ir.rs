use serde::Serialize;

/// Location of one `<a:t>` text node inside a parsed slide part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunNodeRef {
    pub part_name: String,
    pub elem_event_index: usize,
    pub text_event_index: usize,
    pub original_text: String,
}

/// A formatting-homogeneous text span. Owns exactly one text node.
#[derive(Clone, Debug)]
pub struct Run {
    pub node_ref: RunNodeRef,
    /// Source text with surrounding whitespace removed.
    pub text: String,
    /// Character length of `text`; the redistribution weight.
    pub length: usize,
    pub trailing_space: bool,
}

impl Run {
    /// Builds a run from a raw text node. Returns `None` for whitespace-only nodes.
    pub fn from_node(node_ref: RunNodeRef) -> Option<Self> {
        let raw = node_ref.original_text.as_str();
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        let trailing_space = raw.ends_with(char::is_whitespace);
        Some(Self {
            text: text.to_string(),
            length: text.chars().count(),
            trailing_space,
            node_ref,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Paragraph {
    pub part_name: String,
    pub scope_key: String,
    pub runs: Vec<Run>,
}

impl Paragraph {
    /// The sentence key: run texts joined, a single space after runs whose
    /// source ended in whitespace, trimmed as a whole.
    pub fn full_text(&self) -> String {
        let mut out = String::new();
        for run in &self.runs {
            out.push_str(&run.text);
            if run.trailing_space {
                out.push(' ');
            }
        }
        out.trim().to_string()
    }

    pub fn total_length(&self) -> usize {
        self.runs.iter().map(|r| r.length).sum()
    }
}

/// Paragraphs of one successfully parsed slide part.
#[derive(Clone, Debug)]
pub struct SlideText {
    pub index: u32,
    pub part_name: String,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SlideError {
    pub index: u32,
    pub part_name: String,
    pub message: String,
}

#[cfg(test)]
pub(crate) fn test_paragraph(texts: &[&str]) -> Paragraph {
    let runs = texts
        .iter()
        .enumerate()
        .filter_map(|(i, t)| {
            Run::from_node(RunNodeRef {
                part_name: "ppt/slides/slide1.xml".to_string(),
                elem_event_index: i * 3,
                text_event_index: i * 3 + 1,
                original_text: t.to_string(),
            })
        })
        .collect();
    Paragraph {
        part_name: "ppt/slides/slide1.xml".to_string(),
        scope_key: "ppt/slides/slide1.xml#a:p@0".to_string(),
        runs,
    }
}

#[cfg(test)]
mod tests {
    use super::test_paragraph;

    #[test]
    fn full_text_inserts_space_only_after_spaced_runs() {
        let p = test_paragraph(&["Hel", "lo ", "world "]);
        assert_eq!(p.full_text(), "Hello world");
        assert_eq!(p.total_length(), 3 + 2 + 5);
    }

    #[test]
    fn whitespace_only_nodes_are_not_runs() {
        let p = test_paragraph(&["  ", "\t", "Hola"]);
        assert_eq!(p.runs.len(), 1);
        assert_eq!(p.full_text(), "Hola");
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let p = test_paragraph(&["añadir "]);
        assert_eq!(p.runs[0].length, 6);
        assert!(p.runs[0].trailing_space);
    }
}
