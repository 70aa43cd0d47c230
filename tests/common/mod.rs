#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use deck_localizer::provider::{AssistantBackend, ProviderError, RunState, RunStatus};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Answers every numbered line of the request from a phrase table; unknown
/// phrases come back prefixed with `EN `.
pub struct DictionaryBackend {
    table: HashMap<String, String>,
    threads: AtomicUsize,
    runs: AtomicUsize,
    replies: Mutex<HashMap<String, String>>,
}

impl DictionaryBackend {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            table: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            threads: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            replies: Mutex::new(HashMap::new()),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn answer(&self, message: &str) -> String {
        let mut out = Vec::new();
        let body = message.split("TEXTS:\n").nth(1).unwrap_or_default();
        for line in body.lines() {
            let Some(rest) = line.strip_prefix('[') else {
                continue;
            };
            let Some((num, text)) = rest.split_once("] ") else {
                continue;
            };
            let translated = self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| format!("EN {text}"));
            out.push(format!("[{num}] {translated}"));
        }
        out.join("\n")
    }
}

#[async_trait]
impl AssistantBackend for DictionaryBackend {
    async fn create_thread(&self) -> Result<String, ProviderError> {
        let n = self.threads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("thread_{n}"))
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), ProviderError> {
        let reply = self.answer(content);
        self.replies
            .lock()
            .expect("lock")
            .insert(thread_id.to_string(), reply);
        Ok(())
    }

    async fn start_run(&self, thread_id: &str) -> Result<RunState, ProviderError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(RunState {
            id: format!("run_{thread_id}"),
            status: RunStatus::Completed,
            last_error: None,
        })
    }

    async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> Result<RunState, ProviderError> {
        Ok(RunState {
            id: run_id.to_string(),
            status: RunStatus::Completed,
            last_error: None,
        })
    }

    async fn assistant_reply(&self, thread_id: &str) -> Result<String, ProviderError> {
        Ok(self
            .replies
            .lock()
            .expect("lock")
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn slide_xml(paragraphs: &[&[&str]]) -> String {
    let mut body = String::new();
    for runs in paragraphs {
        body.push_str("<a:p>");
        for run in *runs {
            body.push_str(&format!("<a:r><a:rPr lang=\"es-ES\"/><a:t>{run}</a:t></a:r>"));
        }
        body.push_str("</a:p>");
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\"><p:cSld><p:spTree><p:sp><p:txBody>{body}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"
    )
}

pub fn write_deck(path: &Path, entries: &[(&str, &[u8])]) {
    let f = std::fs::File::create(path).expect("create deck");
    let mut zip = ZipWriter::new(f);
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("start file");
        zip.write_all(data).expect("write file");
    }
    zip.finish().expect("finish deck");
}

pub fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let f = std::fs::File::open(path).expect("open deck");
    let mut zip = ZipArchive::new(f).expect("read deck");
    let mut entry = zip.by_name(name).expect("entry");
    let mut out = Vec::new();
    entry.read_to_end(&mut out).expect("read entry");
    out
}

pub fn entry_names(path: &Path) -> Vec<String> {
    let f = std::fs::File::open(path).expect("open deck");
    let zip = ZipArchive::new(f).expect("read deck");
    zip.file_names().map(|s| s.to_string()).collect()
}
