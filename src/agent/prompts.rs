//! Specialty selection and prompt assembly.
//!
//! Specialties are a closed enum; the mapping from task text to
//! specialty is a pure function over team and keywords, and a specialty
//! only ever selects a prompt template. Execution semantics never
//! depend on it.

use crate::task::{Specialty, Task, Team};

/// Keywords that mark a task as atomic validation work.
const VALIDATION_KEYWORDS: &[&str] = &[
    "validate",
    "check",
    "verify",
    "test",
    "audit",
    "html",
    "css",
    "javascript",
    "performance",
];

/// Does this description ask for atomic validation?
pub fn is_atomic_validation(text: &str) -> bool {
    let lowered = text.to_lowercase();
    VALIDATION_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Pure mapping `(team, keywords) -> specialty`.
pub fn specialty_for(team: Team, text: &str) -> Specialty {
    let lowered = text.to_lowercase();
    let has = |kw: &str| lowered.contains(kw);

    if team == Team::Qa {
        return if has("html") || has("structure") || has("markup") {
            Specialty::QaHtml
        } else if has("css") || has("style") {
            Specialty::QaCss
        } else if has("javascript") || has("js") || has("behavior") {
            Specialty::QaJs
        } else {
            Specialty::QaPerformance
        };
    }

    if has("html") || has("markup") || has("page structure") {
        Specialty::Html
    } else if has("css") || has("style") || has("layout") {
        Specialty::Css
    } else if has("javascript") || has(" js ") || has("interactiv") {
        Specialty::Js
    } else if has("api") || has("endpoint") || has("route") {
        Specialty::Api
    } else if has("database") || has("schema") || has(" db ") || has("storage") {
        Specialty::Db
    } else if has("security") || has("auth") {
        Specialty::Security
    } else {
        Specialty::General
    }
}

/// Template id for a specialty; stable identifiers for logs and tests.
pub fn template_id(specialty: Specialty) -> &'static str {
    match specialty {
        Specialty::General => "general",
        Specialty::Html => "frontend_html",
        Specialty::Css => "frontend_css",
        Specialty::Js => "frontend_js",
        Specialty::Api => "backend_api",
        Specialty::Db => "backend_db",
        Specialty::Security => "backend_security",
        Specialty::QaHtml => "qa_html",
        Specialty::QaCss => "qa_css",
        Specialty::QaJs => "qa_js",
        Specialty::QaPerformance => "qa_performance",
    }
}

fn role_preamble(specialty: Specialty) -> &'static str {
    match specialty {
        Specialty::General => "You are a senior software engineer.",
        Specialty::Html => "You are a frontend engineer specializing in semantic HTML.",
        Specialty::Css => "You are a frontend engineer specializing in CSS.",
        Specialty::Js => "You are a frontend engineer specializing in JavaScript.",
        Specialty::Api => "You are a backend engineer specializing in API design.",
        Specialty::Db => "You are a backend engineer specializing in data storage.",
        Specialty::Security => "You are a security engineer.",
        Specialty::QaHtml => {
            "You are a QA engineer. Validate HTML structure only; report findings concisely."
        }
        Specialty::QaCss => {
            "You are a QA engineer. Validate CSS correctness only; report findings concisely."
        }
        Specialty::QaJs => {
            "You are a QA engineer. Validate JavaScript behavior only; report findings concisely."
        }
        Specialty::QaPerformance => {
            "You are a QA engineer. Check performance budgets only; report findings concisely."
        }
    }
}

/// Build the worker prompt for one task, with one-line summaries of its
/// completed upstream tasks.
pub fn build_prompt(task: &Task, upstream: &[(String, String)]) -> String {
    let mut prompt = String::new();

    prompt.push_str(role_preamble(task.specialty));
    prompt.push_str("\n\n");
    prompt.push_str(&format!("# Task: {}\n\n", task.title));
    prompt.push_str(&format!("{}\n\n", task.description));

    if !upstream.is_empty() {
        prompt.push_str("## Completed upstream work\n");
        for (title, summary) in upstream {
            prompt.push_str(&format!("- {}: {}\n", title, summary));
        }
        prompt.push('\n');
    }

    prompt.push_str("## Instructions\n");
    prompt.push_str(
        "Produce the complete deliverable for this task. Put file contents in fenced code \
         blocks tagged with their language. Do not ask questions; make reasonable choices \
         and state them briefly.\n",
    );

    prompt
}

/// Build the project manager's planning prompt.
///
/// When the provider declares JSON markers, the plan is requested
/// between them so it survives surrounding prose.
pub fn planning_prompt(objective: &str, json_markers: Option<&(String, String)>) -> String {
    let (open, close) = match json_markers {
        Some((start, end)) => (start.as_str(), end.as_str()),
        None => ("", ""),
    };

    let mut prompt = String::new();
    prompt.push_str("You are a project manager decomposing an objective into atomic tasks.\n\n");
    prompt.push_str(&format!("# Objective\n{}\n\n", objective));
    prompt.push_str("## Rules\n");
    prompt.push_str(
        "- Every task must be small enough for one specialist to finish in a single sitting.\n\
         - Tag each task with a team: general, frontend, backend, or qa.\n\
         - Express validation as separate per-concern qa tasks (HTML structure, CSS, \
           JavaScript behavior, performance), never one catch-all test task.\n\
         - depends_on lists the zero-based indices of prerequisite tasks.\n\n",
    );
    prompt.push_str("## Output format\n");
    prompt.push_str(&format!(
        "Respond with {}a JSON array, one object per task: \
         [{{\"title\": ..., \"description\": ..., \"team\": ..., \"depends_on\": [indices]}}]{}",
        if open.is_empty() {
            String::new()
        } else {
            format!("the array wrapped between {} and {}: ", open, close)
        },
        if close.is_empty() {
            String::new()
        } else {
            "\nEmit nothing else between the markers.".to_string()
        },
    ));
    prompt.push('\n');
    prompt
}
