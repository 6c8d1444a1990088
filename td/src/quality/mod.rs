//! Quality controller: reviews a completed task's output (C4, spec.md §4.4).

use std::sync::Arc;

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::domain::{QcOutcome, Strictness, Task, Verdict};
use crate::invoker::{AgentInvocation, AgentInvoker};
use crate::orchestrator::cancellation::CancellationToken;

static VERDICT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```verdict\s*\n(.*?)\n?```").unwrap());

#[derive(Debug, serde::Deserialize)]
struct RawVerdict {
    verdict: String,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    issues: Vec<String>,
}

/// Renders a reviewer prompt embedding the task description and the
/// worker's captured stdout.
fn render_review_prompt(task: &Task, worker_stdout: &str) -> String {
    format!(
        "Review the following task output and respond with a single fenced \
         ```verdict``` block containing JSON: {{\"verdict\": \"pass|fail|unknown\", \
         \"feedback\": \"...\", \"issues\": [...] }}.\n\n\
         # Task: {name}\n{prompt}\n\n# Worker output\n{stdout}",
        name = task.name,
        prompt = task.prompt,
        stdout = worker_stdout,
    )
}

/// Parses the first ```` ```verdict ```` fenced block from reviewer stdout.
/// Absence of a parseable block yields `Unknown` (spec.md §4.4).
fn parse_verdict(reviewer_stdout: &str) -> QcOutcome {
    let Some(captures) = VERDICT_BLOCK_RE.captures(reviewer_stdout) else {
        return QcOutcome {
            verdict: Verdict::Unknown,
            feedback: String::new(),
            issues: vec![],
        };
    };

    let block = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    match serde_json::from_str::<RawVerdict>(block) {
        Ok(raw) => {
            let verdict = match raw.verdict.to_lowercase().as_str() {
                "pass" => Verdict::Pass,
                "fail" => Verdict::Fail,
                _ => Verdict::Unknown,
            };
            QcOutcome {
                verdict,
                feedback: raw.feedback,
                issues: raw.issues,
            }
        }
        Err(e) => {
            warn!(error = %e, "quality::parse_verdict: unparseable verdict block");
            QcOutcome {
                verdict: Verdict::Unknown,
                feedback: String::new(),
                issues: vec![],
            }
        }
    }
}

/// Whether an `Unknown` or `Fail` verdict should trigger a retry under the
/// given strictness. `Fail` always retries. `Unknown` retries only under
/// High strictness; Normal behaves like Low here (see DESIGN.md).
pub fn should_retry(verdict: Verdict, strictness: Strictness) -> bool {
    match verdict {
        Verdict::Fail => true,
        Verdict::Unknown => strictness == Strictness::High,
        Verdict::Pass => false,
    }
}

/// Runs one QC pass: pure function of its inputs plus the injected invoker.
/// Performs no persistence (spec.md §4.4).
pub async fn review(
    invoker: &dyn AgentInvoker,
    task: &Task,
    worker_stdout: &str,
    reviewer_persona: &str,
    working_dir: &std::path::Path,
    cancel: &CancellationToken,
) -> QcOutcome {
    debug!(task = %task.number, reviewer = reviewer_persona, "quality::review: invoking reviewer");
    let invocation = AgentInvocation {
        persona: reviewer_persona.to_string(),
        prompt: render_review_prompt(task, worker_stdout),
        working_dir: working_dir.to_path_buf(),
    };

    match invoker.invoke(&invocation, cancel, Arc::new(|_| {})).await {
        Ok(output) => parse_verdict(&output.stdout),
        Err(e) => {
            warn!(task = %task.number, error = %e, "quality::review: reviewer invocation failed, treating as Unknown");
            QcOutcome {
                verdict: Verdict::Unknown,
                feedback: String::new(),
                issues: vec![],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            number: "T1".into(),
            name: "Do thing".into(),
            prompt: "prompt".into(),
            files: vec![],
            deps: vec![],
            agent: None,
            worktree_group: None,
            priority: Default::default(),
            qc: Default::default(),
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[test]
    fn parses_pass_verdict() {
        let stdout = "preamble\n```verdict\n{\"verdict\": \"pass\", \"feedback\": \"looks good\"}\n```\ntrailer";
        let outcome = parse_verdict(stdout);
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.feedback, "looks good");
    }

    #[test]
    fn parses_fail_with_issues() {
        let stdout = "```verdict\n{\"verdict\": \"fail\", \"feedback\": \"bad\", \"issues\": [\"missing test\"]}\n```";
        let outcome = parse_verdict(stdout);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.issues, vec!["missing test".to_string()]);
    }

    #[test]
    fn missing_block_yields_unknown() {
        let outcome = parse_verdict("no structured verdict here");
        assert_eq!(outcome.verdict, Verdict::Unknown);
    }

    #[test]
    fn malformed_json_yields_unknown() {
        let outcome = parse_verdict("```verdict\nnot json\n```");
        assert_eq!(outcome.verdict, Verdict::Unknown);
    }

    #[test]
    fn should_retry_matches_strictness_rules() {
        assert!(should_retry(Verdict::Fail, Strictness::Low));
        assert!(!should_retry(Verdict::Pass, Strictness::High));
        assert!(should_retry(Verdict::Unknown, Strictness::High));
        assert!(!should_retry(Verdict::Unknown, Strictness::Low));
    }

    #[test]
    fn review_prompt_embeds_task_and_stdout() {
        let t = task();
        let prompt = render_review_prompt(&t, "worker output here");
        assert!(prompt.contains("Do thing"));
        assert!(prompt.contains("worker output here"));
    }
}
