use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::DocumentError;

pub const SLIDES_DIR: &str = "ppt/slides";

static SLIDE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^slide(\d+)\.xml$").expect("slide name regex"));

/// Per-entry zip metadata kept from the source so repacking does not change it.
#[derive(Clone, Debug)]
struct EntryMeta {
    compression: CompressionMethod,
    last_modified: zip::DateTime,
    unix_mode: Option<u32>,
}

/// A slide part on disk inside the working directory.
#[derive(Clone, Debug)]
pub struct SlidePartFile {
    pub index: u32,
    /// Container-relative name, e.g. `ppt/slides/slide3.xml`.
    pub name: String,
    pub path: PathBuf,
}

/// A deck unpacked into a private working directory. Slide parts are
/// rewritten in place and the whole directory is zipped back on `repack`.
pub struct DeckPackage {
    workdir: TempDir,
    order: Vec<String>,
    meta: HashMap<String, EntryMeta>,
}

impl DeckPackage {
    pub fn unpack(input: &Path) -> anyhow::Result<Self> {
        if !input.is_file() {
            return Err(DocumentError::MissingInput(input.to_path_buf()).into());
        }
        let f = File::open(input).with_context(|| format!("open deck: {}", input.display()))?;
        let mut zip =
            ZipArchive::new(f).map_err(|e| DocumentError::NotAContainer(e.to_string()))?;
        let workdir = tempfile::Builder::new()
            .prefix("deck-localizer-")
            .tempdir()
            .context("create working directory")?;

        let mut order = Vec::with_capacity(zip.len());
        let mut meta = HashMap::new();
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| DocumentError::NotAContainer(e.to_string()))?;
            let rel = file.enclosed_name().ok_or_else(|| {
                DocumentError::NotAContainer(format!("unsafe entry path: {}", file.name()))
            })?;
            let dest = workdir.path().join(&rel);
            if file.is_dir() {
                fs::create_dir_all(&dest)
                    .with_context(|| format!("create dir: {}", dest.display()))?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create dir: {}", parent.display()))?;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry: {}", file.name()))?;
            fs::write(&dest, &data).with_context(|| format!("write part: {}", dest.display()))?;

            let name = entry_name(&rel);
            meta.insert(
                name.clone(),
                EntryMeta {
                    compression: file.compression(),
                    last_modified: file.last_modified().unwrap_or_default(),
                    unix_mode: file.unix_mode(),
                },
            );
            order.push(name);
        }

        Ok(Self {
            workdir,
            order,
            meta,
        })
    }

    pub fn root(&self) -> &Path {
        self.workdir.path()
    }

    /// Slide parts in ascending slide-number order.
    pub fn slide_parts(&self) -> anyhow::Result<Vec<SlidePartFile>> {
        let dir = self.root().join(SLIDES_DIR);
        if !dir.is_dir() {
            return Err(DocumentError::MissingSlidesDir(SLIDES_DIR.to_string()).into());
        }
        let mut slides = Vec::new();
        for ent in fs::read_dir(&dir).with_context(|| format!("list {}", dir.display()))? {
            let ent = ent.context("read dir entry")?;
            let file_name = ent.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(caps) = SLIDE_NAME_RE.captures(file_name) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<u32>() else {
                continue;
            };
            slides.push(SlidePartFile {
                index,
                name: format!("{SLIDES_DIR}/{file_name}"),
                path: ent.path(),
            });
        }
        if slides.is_empty() {
            return Err(DocumentError::NoSlides(SLIDES_DIR.to_string()).into());
        }
        slides.sort_by_key(|s| s.index);
        Ok(slides)
    }

    /// Zips the working directory into `output`. The archive is built next to
    /// `output`, verified, then renamed over it; a failed build or
    /// verification never touches the final path.
    pub fn repack(&self, output: &Path) -> anyhow::Result<()> {
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
        let tmp = tempfile::Builder::new()
            .prefix(".deck-localizer-")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .context("create temporary output")?;

        let files = self.collect_files()?;
        let f = tmp.reopen().context("open temporary output")?;
        let mut zout = ZipWriter::new(f);
        for (name, path) in &files {
            let data = fs::read(path).with_context(|| format!("read part: {}", path.display()))?;
            let opts = self.options_for(name);
            zout.start_file(name.as_str(), opts)
                .with_context(|| format!("start zip file: {name}"))?;
            zout.write_all(&data)
                .with_context(|| format!("write zip file: {name}"))?;
        }
        zout.finish().context("finish zip")?;

        let members = verify_archive(tmp.path())
            .map_err(|e| DocumentError::Integrity(format!("{e:#}")))?;
        if members != files.len() {
            return Err(DocumentError::Integrity(format!(
                "expected {} members, found {members}",
                files.len()
            ))
            .into());
        }

        tmp.persist(output)
            .map_err(|e| {
                let _ = e.file.close();
                e.error
            })
            .with_context(|| format!("replace output: {}", output.display()))?;
        Ok(())
    }

    fn options_for(&self, name: &str) -> SimpleFileOptions {
        match self.meta.get(name) {
            Some(m) => {
                let mut opts = SimpleFileOptions::default()
                    .compression_method(m.compression)
                    .last_modified_time(m.last_modified);
                if let Some(mode) = m.unix_mode {
                    opts = opts.unix_permissions(mode);
                }
                opts
            }
            None => SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    /// Every file under the working directory: source entries first in their
    /// original order, then anything new sorted by name.
    fn collect_files(&self) -> anyhow::Result<Vec<(String, PathBuf)>> {
        let mut found: HashMap<String, PathBuf> = HashMap::new();
        walk_files(self.root(), self.root(), &mut found)?;

        let mut files = Vec::with_capacity(found.len());
        for name in &self.order {
            if let Some(path) = found.remove(name) {
                files.push((name.clone(), path));
            }
        }
        let mut rest: Vec<(String, PathBuf)> = found.into_iter().collect();
        rest.sort_by(|a, b| a.0.cmp(&b.0));
        files.extend(rest);
        Ok(files)
    }
}

fn walk_files(root: &Path, dir: &Path, out: &mut HashMap<String, PathBuf>) -> anyhow::Result<()> {
    for ent in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let ent = ent.context("read dir entry")?;
        let path = ent.path();
        let ty = ent.file_type().context("file type")?;
        if ty.is_dir() {
            walk_files(root, &path, out)?;
        } else if ty.is_file() {
            let rel = path
                .strip_prefix(root)
                .with_context(|| format!("relative path: {}", path.display()))?;
            out.insert(entry_name(rel), path.clone());
        }
    }
    Ok(())
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reads every member to the end so the zip reader checks each CRC.
/// Returns the number of file members.
pub fn verify_archive(path: &Path) -> anyhow::Result<usize> {
    let f = File::open(path).with_context(|| format!("open archive: {}", path.display()))?;
    let mut zip = ZipArchive::new(f).context("read zip")?;
    let mut members = 0usize;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).context("zip entry")?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        io::copy(&mut file, &mut io::sink()).with_context(|| format!("test member: {name}"))?;
        members += 1;
    }
    Ok(members)
}

#[cfg(test)]
pub(crate) fn write_test_deck(path: &Path, entries: &[(&str, &[u8])]) {
    let f = File::create(path).expect("create deck");
    let mut zout = ZipWriter::new(f);
    for (name, data) in entries {
        zout.start_file(*name, SimpleFileOptions::default())
            .expect("start file");
        zout.write_all(data).expect("write file");
    }
    zout.finish().expect("finish deck");
}
