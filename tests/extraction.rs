//! Sanitization and extraction laws through the public API.

use mao::llm::sanitize;
use mao::{ArtifactExtractor, ArtifactKind};

fn task(title: &str) -> mao::Task {
    mao::Task::new(mao::TaskSpec {
        title: title.to_string(),
        description: "extraction test".to_string(),
        team: mao::Team::Frontend,
        specialty: mao::Specialty::General,
        depends_on: Vec::new(),
    })
}

#[test]
fn test_sanitize_is_idempotent_over_mixed_input() {
    let inputs = [
        "plain",
        "arrows \u{2192} and \u{2190} marks \u{2713}\u{2717}",
        "smart \u{201C}quotes\u{201D} and caf\u{00E9} and \u{4E2D}\u{6587}",
        "already [PASS] tagged -> text",
    ];
    for input in inputs {
        let once = sanitize::sanitize(input);
        assert!(once.is_ascii());
        assert_eq!(sanitize::sanitize(&once), once);

        let (ok, violations) = sanitize::validate(&once);
        assert!(ok, "violations after sanitize: {:?}", violations);
    }
}

#[tokio::test]
async fn test_extraction_is_deterministic_over_identical_input() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = ArtifactExtractor::new(dir.path());
    let t = task("multi file output");

    let raw = concat!(
        "Here is the page:\n",
        "```html\n<!DOCTYPE html><html><body>hi</body></html>\n```\n",
        "And the styles:\n",
        "```css\nbody { margin: 0; }\n```\n",
    );

    let first = extractor.extract("p1", &t, raw).await.unwrap();
    let second = extractor.extract("p1", &t, raw).await.unwrap();

    assert_eq!(first.raw.sha, second.raw.sha);
    assert_eq!(first.deliverables.len(), 2);
    assert_eq!(second.deliverables.len(), 2);
    for (a, b) in first.deliverables.iter().zip(&second.deliverables) {
        assert_eq!(a.sha, b.sha);
        assert_eq!(a.name, b.name);
    }
}

#[tokio::test]
async fn test_raw_output_kept_alongside_deliverables() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = ArtifactExtractor::new(dir.path());
    let t = task("the page");

    let outcome = extractor
        .extract("p1", &t, "```html\n<p>x</p>\n```\ntrailing prose")
        .await
        .unwrap();

    assert_eq!(outcome.raw.kind, ArtifactKind::RawOutput);
    assert!(outcome.raw.path.starts_with("artifacts/"));
    assert_eq!(outcome.deliverables.len(), 1);
    assert_eq!(outcome.deliverables[0].kind, ArtifactKind::Deliverable);
    assert!(outcome.deliverables[0].path.starts_with("deliverables/"));

    // Both files exist where the metadata says they do.
    for meta in std::iter::once(&outcome.raw).chain(&outcome.deliverables) {
        let path = dir.path().join("p1").join(&meta.path);
        assert!(path.exists(), "missing {}", path.display());
    }
}

#[tokio::test]
async fn test_distinct_tasks_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = ArtifactExtractor::new(dir.path());

    let first = extractor
        .extract("p1", &task("header"), "```css\n.h { color: red; }\n```")
        .await
        .unwrap();
    let second = extractor
        .extract("p1", &task("footer"), "```css\n.f { color: blue; }\n```")
        .await
        .unwrap();

    assert_eq!(first.deliverables[0].name, "header.css");
    assert_eq!(second.deliverables[0].name, "footer.css");
}
