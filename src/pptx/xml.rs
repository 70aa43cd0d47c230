use anyhow::{anyhow, bail, Context};
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

/// Declaration written in front of parts whose source omitted one.
pub const XML_DECLARATION: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";

/// One node of a slide part. Elements and text are decoded so runs can be
/// located and rewritten; everything else is carried as the exact source
/// markup.
#[derive(Clone, Debug)]
pub enum XmlEvent {
    /// The `<?xml ...?>` declaration.
    Decl { markup: String },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End { name: String },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text { text: String },
    /// Comment, CDATA section or processing instruction.
    Markup { raw: String },
}

impl XmlEvent {
    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            XmlEvent::Decl { markup } => out.extend_from_slice(markup.as_bytes()),
            XmlEvent::Markup { raw } => out.extend_from_slice(raw.as_bytes()),
            XmlEvent::Start { name, attrs } => write_tag(out, name, attrs, b">"),
            XmlEvent::Empty { name, attrs } => write_tag(out, name, attrs, b"/>"),
            XmlEvent::End { name } => {
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.push(b'>');
            }
            XmlEvent::Text { text } => out.extend_from_slice(partial_escape(text).as_bytes()),
        }
    }
}

/// Attribute values are stored still escaped, so they are written back as is.
fn write_tag(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], close: &[u8]) {
    out.push(b'<');
    out.extend_from_slice(name.as_bytes());
    for (k, v) in attrs {
        out.push(b' ');
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b"=\"");
        out.extend_from_slice(v.as_bytes());
        out.push(b'"');
    }
    out.extend_from_slice(close);
}

/// A slide part held as a flat, lossless event list. Text nodes are edited in
/// place through their event index.
#[derive(Clone, Debug)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
    pub baseline_hash: String,
}

impl XmlPart {
    pub fn has_declaration(&self) -> bool {
        matches!(self.events.first(), Some(XmlEvent::Decl { .. }))
    }
}

/// Parses a slide part. Mismatched or unclosed elements are errors even where
/// the reader would tolerate them, and DTDs are refused: package parts may
/// not carry one.
pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> anyhow::Result<XmlPart> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(false);

    let mut events: Vec<XmlEvent> = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let start = reader.buffer_position() as usize;
        let ev = reader
            .read_event_into(&mut buf)
            .with_context(|| format!("read xml event near byte {start}"))?;
        let end = reader.buffer_position() as usize;
        let source = || -> anyhow::Result<String> {
            let raw = xml_bytes
                .get(start..end)
                .ok_or_else(|| anyhow!("event span {start}..{end} out of range"))?;
            Ok(lossy(raw))
        };
        let node = match ev {
            Event::Eof => break,
            Event::DocType(_) => bail!("DTD not allowed in {name}"),
            Event::Decl(_) => XmlEvent::Decl { markup: source()? },
            Event::Comment(_) | Event::CData(_) | Event::PI(_) => {
                XmlEvent::Markup { raw: source()? }
            }
            Event::Start(s) => {
                let tag = lossy(s.name().as_ref());
                open.push(tag.clone());
                XmlEvent::Start {
                    name: tag,
                    attrs: raw_attrs(&s)?,
                }
            }
            Event::Empty(s) => XmlEvent::Empty {
                name: lossy(s.name().as_ref()),
                attrs: raw_attrs(&s)?,
            },
            Event::End(e) => {
                let tag = lossy(e.name().as_ref());
                match open.pop() {
                    Some(expected) if expected == tag => {}
                    Some(expected) => bail!(
                        "mismatched end tag </{tag}> (expected </{expected}>) near byte {start}"
                    ),
                    None => bail!("unexpected end tag </{tag}> near byte {start}"),
                }
                XmlEvent::End { name: tag }
            }
            Event::Text(t) => XmlEvent::Text {
                text: t.unescape().context("unescape text")?.into_owned(),
            },
        };
        events.push(node);
    }

    if let Some(unclosed) = open.last() {
        bail!("unclosed element <{unclosed}> at end of {name}");
    }
    if !events
        .iter()
        .any(|e| matches!(e, XmlEvent::Start { .. } | XmlEvent::Empty { .. }))
    {
        bail!("no root element in {name}");
    }

    let baseline_hash = structure_hash(&events);
    Ok(XmlPart {
        name: name.to_string(),
        events,
        baseline_hash,
    })
}

fn raw_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    s.attributes()
        .map(|a| {
            let a = a.context("attribute")?;
            Ok((lossy(a.key.as_ref()), lossy(a.value.as_ref())))
        })
        .collect()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn write_xml_part(part: &XmlPart) -> Vec<u8> {
    let mut out = Vec::new();
    for ev in &part.events {
        ev.write_to(&mut out);
    }
    out
}

/// Serializes a slide part for the container. Slide parts must start with an
/// XML declaration, so one is prepended when the source had none.
pub fn serialize_slide_part(part: &XmlPart) -> anyhow::Result<Vec<u8>> {
    verify_structure_unchanged(part)?;
    let body = write_xml_part(part);
    if part.has_declaration() {
        return Ok(body);
    }
    let mut out = Vec::with_capacity(XML_DECLARATION.len() + body.len());
    out.extend_from_slice(XML_DECLARATION);
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn verify_structure_unchanged(part: &XmlPart) -> anyhow::Result<()> {
    let cur = structure_hash(&part.events);
    if cur != part.baseline_hash {
        bail!(
            "non-text structure changed in {} (baseline={} current={})",
            part.name,
            part.baseline_hash,
            cur
        );
    }
    Ok(())
}

/// Hash of every node except the content of `<a:t>` elements.
fn structure_hash(events: &[XmlEvent]) -> String {
    let mut hasher = Sha256::new();
    let mut stack: Vec<&str> = Vec::new();
    for ev in events {
        match ev {
            XmlEvent::Start { name, attrs } => {
                stack.push(name);
                feed_tag(&mut hasher, b'S', name, attrs);
            }
            XmlEvent::Empty { name, attrs } => feed_tag(&mut hasher, b'L', name, attrs),
            XmlEvent::End { name } => {
                stack.pop();
                feed(&mut hasher, b'E', name);
            }
            XmlEvent::Text { .. } if stack.last().is_some_and(|n| is_text_tag(n)) => {}
            XmlEvent::Text { text } => feed(&mut hasher, b'T', text),
            XmlEvent::Decl { markup } => feed(&mut hasher, b'D', markup),
            XmlEvent::Markup { raw } => feed(&mut hasher, b'M', raw),
        }
    }
    hex::encode(hasher.finalize())
}

fn feed(hasher: &mut Sha256, kind: u8, body: &str) {
    hasher.update([kind, b':']);
    hasher.update(body.as_bytes());
    hasher.update(b"\n");
}

fn feed_tag(hasher: &mut Sha256, kind: u8, name: &str, attrs: &[(String, String)]) {
    feed(hasher, kind, name);
    for (k, v) in attrs {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b";");
    }
}

pub fn is_text_tag(name: &str) -> bool {
    name == "a:t"
}
