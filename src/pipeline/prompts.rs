use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";
pub const DEFAULT_TRANSLATE: &str = "translate.txt";

/// Instruction sent in front of every batch. Placeholders:
/// `{{source_lang}}`, `{{target_lang}}`.
pub const DEFAULT_TRANSLATE_TEXT: &str = r#"You are a professional translator of presentation slides.
Translate the following texts from {{source_lang}} to {{target_lang}}.
Reply only with the translation of each text, keeping the original numbering in the format [number] translated_text.
Do not explain or comment on your translations. Do not add any information.
Keep the tone, punctuation and structure of the original text. Leave numbers, codes and proper names unchanged."#;

/// Header line of the numbered list that follows the instructions.
pub const PAYLOAD_HEADER: &str = "TEXTS:";

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

/// Reads the instruction template from `path` (relative to `config_dir`),
/// or returns the built-in one when no path is configured.
pub fn load_prompt(config_dir: &Path, path: Option<&str>) -> anyhow::Result<String> {
    let Some(path) = path.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(DEFAULT_TRANSLATE_TEXT.to_string());
    };
    let mut p = PathBuf::from(path);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found: {} (run: deck-localizer --init-config)",
            p.display()
        ));
    }
    let text =
        std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    if text.trim().is_empty() {
        return Err(anyhow!("prompt file is empty: {}", p.display()));
    }
    Ok(text)
}

/// Numbered user payload: `TEXTS:` followed by one `[i] sentence` per line.
pub fn build_user_payload(texts: &[String]) -> String {
    let mut out = String::from(PAYLOAD_HEADER);
    for (i, t) in texts.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("[{}] {}", i + 1, t));
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![(DEFAULT_TRANSLATE, DEFAULT_TRANSLATE_TEXT)]
}

#[cfg(test)]
mod tests {
    use super::{build_user_payload, load_prompt, render_template, DEFAULT_TRANSLATE_TEXT};

    #[test]
    fn template_vars_are_replaced() {
        let out = render_template(
            DEFAULT_TRANSLATE_TEXT,
            &[("source_lang", "Spanish"), ("target_lang", "English")],
        );
        assert!(out.contains("from Spanish to English"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn payload_numbers_from_one() {
        let texts = vec!["Hola".to_string(), "Adiós amigos".to_string()];
        assert_eq!(build_user_payload(&texts), "TEXTS:\n[1] Hola\n[2] Adiós amigos");
    }

    #[test]
    fn prompt_file_is_optional_but_must_exist_when_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            load_prompt(dir.path(), None).expect("default"),
            DEFAULT_TRANSLATE_TEXT
        );
        assert!(load_prompt(dir.path(), Some("prompts/missing.txt")).is_err());

        std::fs::write(dir.path().join("mine.txt"), "Translate to {{target_lang}}").expect("write");
        assert_eq!(
            load_prompt(dir.path(), Some("mine.txt")).expect("custom"),
            "Translate to {{target_lang}}"
        );
    }
}
