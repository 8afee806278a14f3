//! Deliverable extraction strategies.
//!
//! The raw LLM output is always persisted verbatim (post-sanitization)
//! under `artifacts/<task_id>/`. Deliverables are then pulled out by a
//! fixed strategy order, each contributing independently:
//!
//! 1. fenced code blocks with a language tag, one file per block;
//! 2. unfenced inline HTML (`<!DOCTYPE` / `<html`), one `.html` file;
//! 3. CSS rule bodies in the remaining prose, one `.css` file;
//! 4. JavaScript-looking lines in the remaining prose, one `.js` file;
//! 5. "permission to write <name>" prose, which names the next block.
//!
//! Names come from the task title slug; collisions gain cumulative
//! `_1`, `_1_2`, ... suffixes unless the existing file already holds
//! identical bytes, in which case the write is a no-op so reruns do not
//! multiply deliverables.

use crate::artifact::types::{ArtifactKind, ArtifactMeta, ExtractionOutcome};
use crate::env;
use crate::llm::sanitize;
use crate::task::Task;
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::debug;

/// File name used for every task's verbatim output
const RAW_OUTPUT_FILE: &str = "raw_output.txt";

/// Fallback deliverable base name when a task title slugs to nothing
const FALLBACK_BASE: &str = "code";

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\n(.*?)```").expect("static regex")
});

static CSS_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*[.#]?[A-Za-z][\w .,:>#*\[\]='"-]*\{[^{}]*:[^{}]*\}"#)
        .expect("static regex")
});

static JS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(function\s+\w+|const\s+\w+|let\s+\w+|var\s+\w+|export\s+|\w+\s*=\s*\([^)]*\)\s*=>)")
        .expect("static regex")
});

static PERMISSION_PROSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:permission to (?:write|create)|may i (?:write|create)|shall i (?:write|create)|i will create|i'll create)[^\n]*?([\w-]+\.[A-Za-z0-9]{1,5})",
    )
    .expect("static regex")
});

/// A candidate file before naming and persistence.
struct Candidate {
    /// Explicit file name, when a strategy knows one
    name: Option<String>,
    extension: String,
    body: String,
}

/// Extractor bound to one projects directory.
#[derive(Debug, Clone)]
pub struct ArtifactExtractor {
    projects_dir: PathBuf,
}

impl ArtifactExtractor {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    /// Persist the raw output and every extractable deliverable.
    pub async fn extract(
        &self,
        project_id: &str,
        task: &Task,
        raw_text: &str,
    ) -> Result<ExtractionOutcome> {
        let clean = sanitize::sanitize(raw_text);
        let task_id = task.id.to_string();

        let raw = self.persist_raw(project_id, &task_id, &clean).await?;

        let mut candidates = Vec::new();
        let remainder = Self::collect_fenced(&clean, &mut candidates);
        Self::collect_inline_html(&remainder, &mut candidates);
        Self::collect_css(&remainder, &mut candidates);
        Self::collect_js(&remainder, &mut candidates);
        Self::apply_permission_names(&clean, &mut candidates);

        let base = slug(&task.title);
        let deliverables_dir = env::deliverables_dir_path(&self.projects_dir, project_id);
        fs::create_dir_all(&deliverables_dir).await?;

        let mut deliverables = Vec::new();
        for candidate in candidates {
            let meta = self
                .persist_deliverable(project_id, &task_id, &deliverables_dir, &base, candidate)
                .await?;
            deliverables.push(meta);
        }

        debug!(
            %task_id,
            deliverables = deliverables.len(),
            "extraction finished"
        );
        Ok(ExtractionOutcome { raw, deliverables })
    }

    async fn persist_raw(
        &self,
        project_id: &str,
        task_id: &str,
        clean: &str,
    ) -> Result<ArtifactMeta> {
        let dir = env::task_artifacts_dir_path(&self.projects_dir, project_id, task_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create artifact dir: {}", dir.display()))?;

        let path = dir.join(RAW_OUTPUT_FILE);
        fs::write(&path, clean.as_bytes()).await?;

        Ok(ArtifactMeta {
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
            kind: ArtifactKind::RawOutput,
            name: RAW_OUTPUT_FILE.to_string(),
            path: format!("{}/{}/{}", env::ARTIFACTS_DIR_NAME, task_id, RAW_OUTPUT_FILE),
            created_at: Utc::now(),
            sha: sha_hex(clean.as_bytes()),
        })
    }

    async fn persist_deliverable(
        &self,
        project_id: &str,
        task_id: &str,
        deliverables_dir: &Path,
        base: &str,
        candidate: Candidate,
    ) -> Result<ArtifactMeta> {
        let body = sanitize::sanitize(&candidate.body);
        let sha = sha_hex(body.as_bytes());

        let desired = candidate
            .name
            .unwrap_or_else(|| format!("{}.{}", base, candidate.extension));

        let name = resolve_name(deliverables_dir, &desired, &sha).await?;
        let path = deliverables_dir.join(&name);
        if !path.exists() {
            fs::write(&path, body.as_bytes())
                .await
                .with_context(|| format!("Failed to write deliverable: {}", path.display()))?;
        }

        Ok(ArtifactMeta {
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
            kind: ArtifactKind::Deliverable,
            name: name.clone(),
            path: format!("{}/{}", env::DELIVERABLES_DIR_NAME, name),
            created_at: Utc::now(),
            sha,
        })
    }

    /// Strategy 1: fenced blocks with language tags. Returns the text
    /// with matched blocks removed so later strategies see only prose.
    /// Untagged fences are not deliverables themselves; their content
    /// stays in the remainder for the heuristic strategies.
    fn collect_fenced(text: &str, out: &mut Vec<Candidate>) -> String {
        let mut remainder = String::with_capacity(text.len());
        let mut cursor = 0;

        for caps in FENCED_BLOCK.captures_iter(text) {
            let whole = caps.get(0).expect("match exists");
            let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");

            remainder.push_str(&text[cursor..whole.start()]);
            cursor = whole.end();

            if body.trim().is_empty() {
                continue;
            }
            if tag.is_empty() {
                remainder.push_str(body);
                continue;
            }
            out.push(Candidate {
                name: None,
                extension: extension_for_tag(tag),
                body: body.to_string(),
            });
        }
        remainder.push_str(&text[cursor..]);
        remainder
    }

    /// Strategy 2: unfenced inline HTML.
    fn collect_inline_html(remainder: &str, out: &mut Vec<Candidate>) {
        let lowered = remainder.to_lowercase();
        let start = lowered.find("<!doctype").or_else(|| lowered.find("<html"));
        let Some(start) = start else {
            return;
        };

        let end = lowered
            .find("</html>")
            .map(|i| i + "</html>".len())
            .unwrap_or(remainder.len());
        if end <= start {
            return;
        }

        out.push(Candidate {
            name: None,
            extension: "html".to_string(),
            body: remainder[start..end].trim().to_string(),
        });
    }

    /// Strategy 3: CSS rule bodies in prose.
    fn collect_css(remainder: &str, out: &mut Vec<Candidate>) {
        let rules: Vec<&str> = CSS_RULE
            .find_iter(remainder)
            .map(|m| m.as_str().trim())
            .collect();
        if rules.is_empty() {
            return;
        }
        out.push(Candidate {
            name: None,
            extension: "css".to_string(),
            body: rules.join("\n\n"),
        });
    }

    /// Strategy 4: JavaScript-looking prose.
    fn collect_js(remainder: &str, out: &mut Vec<Candidate>) {
        if !JS_LINE.is_match(remainder) {
            return;
        }

        // Take the contiguous run of lines from the first JS-looking
        // line to the last, dropping obvious prose edges.
        let lines: Vec<&str> = remainder.lines().collect();
        let first = lines.iter().position(|l| JS_LINE.is_match(l));
        let last = lines.iter().rposition(|l| {
            JS_LINE.is_match(l) || l.trim_end().ends_with(['}', ';'])
        });
        let (Some(first), Some(last)) = (first, last) else {
            return;
        };
        if last < first {
            return;
        }

        let body = lines[first..=last].join("\n");
        if body.trim().is_empty() {
            return;
        }
        out.push(Candidate {
            name: None,
            extension: "js".to_string(),
            body,
        });
    }

    /// Strategy 5: "permission to write <file>" prose names the first
    /// still-unnamed candidate of a matching extension.
    fn apply_permission_names(text: &str, candidates: &mut [Candidate]) {
        for caps in PERMISSION_PROSE.captures_iter(text) {
            let file_name = caps.get(1).expect("capture exists").as_str().to_string();
            let wanted_ext = file_name.rsplit('.').next().unwrap_or("").to_lowercase();

            let target_idx = candidates
                .iter()
                .position(|c| c.name.is_none() && c.extension == wanted_ext)
                .or_else(|| candidates.iter().position(|c| c.name.is_none()));

            if let Some(idx) = target_idx {
                candidates[idx].name = Some(file_name);
            }
        }
    }
}

/// Slug a task title into a file base name.
fn slug(title: &str) -> String {
    let mut out = String::new();
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('_');
            last_dash = true;
        }
        if out.len() >= 40 {
            break;
        }
    }
    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        FALLBACK_BASE.to_string()
    } else {
        trimmed
    }
}

/// Pick the final file name for `desired` inside `dir`.
///
/// An existing file with identical contents is reused as-is; otherwise
/// collision suffixes accumulate: `name`, `name_1`, `name_1_2`, ...
async fn resolve_name(dir: &Path, desired: &str, sha: &str) -> Result<String> {
    let (stem, ext) = match desired.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), ext.to_string()),
        None => (desired.to_string(), String::new()),
    };

    let mut stem_now = stem;
    let mut suffix = 0u32;
    loop {
        let name = if ext.is_empty() {
            stem_now.clone()
        } else {
            format!("{}.{}", stem_now, ext)
        };
        let path = dir.join(&name);
        if !path.exists() {
            return Ok(name);
        }

        let existing = fs::read(&path).await?;
        if sha_hex(&existing) == sha {
            return Ok(name);
        }

        suffix += 1;
        stem_now = format!("{}_{}", stem_now, suffix);
    }
}

fn sha_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn extension_for_tag(tag: &str) -> String {
    match tag.to_lowercase().as_str() {
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "python" | "py" => "py",
        "rust" | "rs" => "rs",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "bash" | "sh" | "shell" => "sh",
        "sql" => "sql",
        "markdown" | "md" => "md",
        "" | "text" | "txt" | "plain" => "txt",
        other if other.len() <= 4 && other.chars().all(|c| c.is_ascii_alphanumeric()) => {
            return other.to_string();
        }
        _ => "txt",
    }
    .to_string()
}
