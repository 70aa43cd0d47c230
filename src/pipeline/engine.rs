use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use tokio::task;
use tracing::{info, warn};

use crate::error::DocumentError;
use crate::ir::SlideError;
use crate::pipeline::cache::{CacheStats, TranslationCache};
use crate::pipeline::client::TranslationClient;
use crate::pipeline::config::LocalizerConfig;
use crate::pipeline::cost::CostSummary;
use crate::pipeline::prompts::render_template;
use crate::pipeline::translator::{Translator, TranslatorStats};
use crate::pptx::apply::apply_slide_translations;
use crate::pptx::extract::{extract_deck_text, DeckText};
use crate::pptx::package::DeckPackage;
use crate::pptx::xml::{parse_xml_part, serialize_slide_part};
use crate::progress::ConsoleProgress;
use crate::provider::openai::OpenAiAssistants;
use crate::provider::AssistantBackend;
use crate::textutil::language_name;

/// Aggregate record of one document job.
#[derive(Clone, Debug, Default, Serialize)]
pub struct JobStats {
    pub input: String,
    pub output: String,
    pub source_language: String,
    pub target_language: String,
    pub slides_total: usize,
    pub slides_processed: usize,
    pub slides_rewritten: usize,
    pub slide_errors: Vec<SlideError>,
    pub paragraphs: usize,
    pub paragraphs_translated: usize,
    pub unique_texts: usize,
    pub translator: TranslatorStats,
    pub cache: Option<CacheStats>,
    pub cost: CostSummary,
    pub elapsed_secs: f64,
}

impl JobStats {
    pub fn error_count(&self) -> usize {
        self.slide_errors.len()
    }
}

#[derive(Clone, Debug)]
pub struct LocalizeOutcome {
    pub output_path: PathBuf,
    pub stats: JobStats,
}

/// Translates slide decks end to end: unpack, extract, translate, write the
/// runs back and repack.
pub struct DeckLocalizer {
    cfg: LocalizerConfig,
    backend: Arc<dyn AssistantBackend>,
    progress: ConsoleProgress,
}

impl DeckLocalizer {
    pub fn new(
        cfg: LocalizerConfig,
        backend: Arc<dyn AssistantBackend>,
        progress: ConsoleProgress,
    ) -> Self {
        Self {
            cfg,
            backend,
            progress,
        }
    }

    /// Uses the HTTP provider with credentials from the environment.
    pub fn with_openai(cfg: LocalizerConfig, progress: ConsoleProgress) -> anyhow::Result<Self> {
        let settings = cfg.openai_settings()?;
        let backend = OpenAiAssistants::new(settings).context("create provider client")?;
        Ok(Self::new(cfg, Arc::new(backend), progress))
    }

    pub async fn process_document(
        &self,
        input: &Path,
        output: &Path,
        target_language: &str,
    ) -> anyhow::Result<LocalizeOutcome> {
        let t0 = Instant::now();
        let target = self.cfg.validate_target_language(target_language)?;

        self.progress.info(format!("Read deck: {}", input.display()));
        let reader_input = input.to_path_buf();
        let cache_dir = self.cfg.cache.enabled.then(|| self.cfg.cache.dir.clone());
        let cache_lang = target.clone();
        let (pkg, slides_total, mut deck, cache) = task::spawn_blocking(move || {
            let pkg = DeckPackage::unpack(&reader_input)?;
            let slide_parts = pkg.slide_parts()?;
            let deck = extract_deck_text(&slide_parts);
            ensure_translatable(&deck, slide_parts.len())?;
            let cache = cache_dir.map(|dir| TranslationCache::open(&dir, &cache_lang));
            anyhow::Ok((pkg, slide_parts.len(), deck, cache))
        })
        .await
        .context("deck reader task")??;
        self.progress.info(format!(
            "Extracted {} paragraphs ({} unique texts) from {} slides, {} skipped",
            deck.paragraph_count(),
            deck.sentences.len(),
            deck.slides.len(),
            deck.errors.len()
        ));

        let source_name = language_name(&self.cfg.source_language);
        let target_name = language_name(&target);
        let instructions = render_template(
            &self.cfg.prompt_template,
            &[
                ("source_lang", source_name.as_str()),
                ("target_lang", target_name.as_str()),
            ],
        );
        let client = TranslationClient::new(self.backend.clone(), self.cfg.retry, self.cfg.polling);
        let mut translator = Translator::new(
            client,
            cache,
            instructions,
            self.cfg.batching,
            self.cfg.pacing,
        );

        self.progress.info(format!(
            "Language: {} -> {}",
            self.cfg.source_language, target
        ));
        let translations = translator.translate(&deck.sentences, &self.progress).await;
        if let Err(e) = translator.save_cache() {
            warn!(error = %format!("{e:#}"), "translation cache not saved");
        }

        self.progress.info(format!("Write deck: {}", output.display()));
        let writer_output = output.to_path_buf();
        let (deck, written) = task::spawn_blocking(move || {
            let written = write_translated_slides(&mut deck, &translations)?;
            pkg.repack(&writer_output)?;
            anyhow::Ok((deck, written))
        })
        .await
        .context("deck writer task")??;

        let translator_stats = translator.stats().clone();
        let stats = JobStats {
            input: input.display().to_string(),
            output: output.display().to_string(),
            source_language: self.cfg.source_language.clone(),
            target_language: target,
            slides_total,
            slides_processed: deck.slides.len(),
            slides_rewritten: written.slides,
            paragraphs: deck.paragraph_count(),
            paragraphs_translated: written.paragraphs,
            unique_texts: deck.sentences.len(),
            slide_errors: deck.errors,
            cost: self.cfg.pricing.summarize(&translator_stats),
            translator: translator_stats,
            cache: translator.cache_stats(),
            elapsed_secs: t0.elapsed().as_secs_f64(),
        };
        info!(
            slides = stats.slides_processed,
            errors = stats.error_count(),
            translated = stats.translator.texts_translated,
            failed_batches = stats.translator.failed_batches,
            cost = stats.cost.total_cost,
            "document localized"
        );
        Ok(LocalizeOutcome {
            output_path: output.to_path_buf(),
            stats,
        })
    }
}

struct WrittenSlides {
    slides: usize,
    paragraphs: usize,
}

/// Applies translations to every loaded slide and rewrites the parts that
/// changed in the working directory.
fn write_translated_slides(
    deck: &mut DeckText,
    translations: &HashMap<String, String>,
) -> anyhow::Result<WrittenSlides> {
    let mut written = WrittenSlides {
        slides: 0,
        paragraphs: 0,
    };
    for slide in deck.slides.iter_mut() {
        let changed = apply_slide_translations(slide, translations)
            .with_context(|| format!("apply translations: {}", slide.text.part_name))?;
        if changed == 0 {
            continue;
        }
        let bytes = serialize_slide_part(&slide.part)?;
        std::fs::write(&slide.path, bytes)
            .with_context(|| format!("write slide: {}", slide.path.display()))?;
        written.paragraphs += changed;
        written.slides += 1;
    }
    Ok(written)
}

fn ensure_translatable(deck: &DeckText, slide_count: usize) -> anyhow::Result<()> {
    if deck.slides.is_empty() {
        return Err(DocumentError::NoSlidesParsed(slide_count).into());
    }
    if deck.paragraph_count() == 0 {
        return Err(DocumentError::NoParagraphs(deck.slides.len()).into());
    }
    Ok(())
}

/// Extracts a deck's text without contacting the provider.
pub fn extract_document(input: &Path) -> anyhow::Result<DeckText> {
    let pkg = DeckPackage::unpack(input)?;
    let slide_parts = pkg.slide_parts()?;
    Ok(extract_deck_text(&slide_parts))
}

/// Re-serializes every parseable slide and repacks the container. Returns the
/// number of slides rewritten.
pub fn roundtrip_document(input: &Path, output: &Path) -> anyhow::Result<usize> {
    let pkg = DeckPackage::unpack(input)?;
    let mut rewritten = 0usize;
    for slide in pkg.slide_parts()? {
        let bytes =
            std::fs::read(&slide.path).with_context(|| format!("read slide: {}", slide.name))?;
        let part = match parse_xml_part(&slide.name, &bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(slide = slide.index, error = %format!("{e:#}"), "slide left as is");
                continue;
            }
        };
        let out = serialize_slide_part(&part)?;
        std::fs::write(&slide.path, out)
            .with_context(|| format!("write slide: {}", slide.path.display()))?;
        rewritten += 1;
    }
    pkg.repack(output)?;
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{roundtrip_document, DeckLocalizer};
    use crate::error::DocumentError;
    use crate::pipeline::config::LocalizerConfig;
    use crate::pptx::package::{verify_archive, write_test_deck};
    use crate::progress::ConsoleProgress;
    use crate::provider::testing::MockBackend;

    fn localizer(backend: Arc<MockBackend>) -> DeckLocalizer {
        DeckLocalizer::new(LocalizerConfig::default(), backend, ConsoleProgress::new(false))
    }

    #[tokio::test(start_paused = true)]
    async fn deck_without_text_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.pptx");
        write_test_deck(
            &input,
            &[("ppt/slides/slide1.xml", b"<p:sld><a:p><a:endParaRPr/></a:p></p:sld>")],
        );
        let backend = Arc::new(MockBackend::echo("EN "));
        let err = localizer(backend.clone())
            .process_document(&input, &dir.path().join("out.pptx"), "en")
            .await
            .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<DocumentError>(),
            Some(DocumentError::NoParagraphs(1))
        ));
        assert_eq!(backend.attempts(), 0);
        assert!(!dir.path().join("out.pptx").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn all_slides_broken_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.pptx");
        write_test_deck(&input, &[("ppt/slides/slide1.xml", b"<p:sld><a:p>")]);
        let err = localizer(Arc::new(MockBackend::echo("")))
            .process_document(&input, &dir.path().join("out.pptx"), "en")
            .await
            .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<DocumentError>(),
            Some(DocumentError::NoSlidesParsed(1))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_language_fails_before_reading() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = localizer(Arc::new(MockBackend::echo("")))
            .process_document(&dir.path().join("missing.pptx"), &dir.path().join("o.pptx"), "xx")
            .await
            .expect_err("must fail");
        assert!(format!("{err:#}").contains("unsupported target language"));
    }

    #[test]
    fn roundtrip_adds_declarations_and_keeps_broken_slides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.pptx");
        write_test_deck(
            &input,
            &[
                ("[Content_Types].xml", b"<Types/>"),
                ("ppt/slides/slide1.xml", b"<p:sld><a:t>A</a:t></p:sld>"),
                ("ppt/slides/slide2.xml", b"<p:sld><a:t>B</a:x></p:sld>"),
            ],
        );
        let output = dir.path().join("out.pptx");
        assert_eq!(roundtrip_document(&input, &output).expect("roundtrip"), 1);
        assert_eq!(verify_archive(&output).expect("verify"), 3);
    }
}
