//! Run evaluators.
//!
//! After the agent and validation stages, the evaluator set inspects the
//! outcome from several angles: did dependencies install, did tests pass,
//! are required dependencies present, what does an LLM judge think of the
//! answer, and do cheap heuristics agree. Each evaluator yields a 0..1
//! score plus optional diagnostic detail.
//!
//! Evaluators are isolated: one throwing never aborts the stage. Its score
//! becomes 0 and the thrown error is kept as detail for that evaluator.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::{AgentAdapter, AgentRequest, ChatMessage};
use crate::scenario::Scenario;
use crate::scoring::{CommandLogEntry, ScoreCard};

/// Output of one evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorScore {
    /// 0..1.
    pub score: f64,
    pub detail: Option<String>,
}

impl EvaluatorScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            detail: None,
        }
    }

    pub fn with_detail(score: f64, detail: impl Into<String>) -> Self {
        Self {
            score,
            detail: Some(detail.into()),
        }
    }
}

/// One evaluator's contribution to the run record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EvaluationDetail {
    pub evaluator: String,
    pub score: f64,
    pub detail: Option<String>,
    pub error: Option<String>,
}

/// Everything an evaluator may look at.
pub struct EvaluationContext<'a> {
    pub scenario: &'a Scenario,
    /// The tier prompt the agent was given.
    pub tier_prompt: &'a str,
    /// The agent's final textual answer.
    pub final_content: &'a str,
    /// Tool calls the agent executed.
    pub tool_calls: u32,
    pub workspace: Option<&'a Path>,
    pub command_log: &'a [CommandLogEntry],
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    /// Code-based evaluators presuppose a workspace and command log; they
    /// are skipped in judge-only mode and for artifact scenarios.
    fn code_based(&self) -> bool;

    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> anyhow::Result<EvaluatorScore>;
}

/// Runs a fixed collection of evaluators and folds their output into a
/// [`ScoreCard`].
pub struct EvaluatorSet {
    evaluators: Vec<Box<dyn Evaluator>>,
}

impl EvaluatorSet {
    pub fn new(evaluators: Vec<Box<dyn Evaluator>>) -> Self {
        Self { evaluators }
    }

    /// The shipped evaluator lineup. `judge` handles the LLM-judge calls.
    pub fn standard(judge: Arc<dyn AgentAdapter>) -> Self {
        Self::new(vec![
            Box::new(InstallCheck),
            Box::new(TestsCheck),
            Box::new(DependencyTargets),
            Box::new(LlmJudge::new(judge)),
            Box::new(HeuristicChecks),
        ])
    }

    /// Evaluates the run. With `judge_only`, code-based evaluators are
    /// skipped entirely (they still appear in the card as 0).
    pub async fn evaluate(
        &self,
        ctx: &EvaluationContext<'_>,
        judge_only: bool,
    ) -> (ScoreCard, Vec<EvaluationDetail>) {
        let mut scores = std::collections::HashMap::new();
        let mut details = Vec::new();

        for evaluator in &self.evaluators {
            if judge_only && evaluator.code_based() {
                debug!(evaluator = evaluator.name(), "skipped in judge-only mode");
                continue;
            }

            match evaluator.evaluate(ctx).await {
                Ok(result) => {
                    scores.insert(evaluator.name().to_string(), result.score);
                    details.push(EvaluationDetail {
                        evaluator: evaluator.name().to_string(),
                        score: result.score,
                        detail: result.detail,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(
                        evaluator = evaluator.name(),
                        error = %e,
                        "evaluator failed; scoring 0"
                    );
                    scores.insert(evaluator.name().to_string(), 0.0);
                    details.push(EvaluationDetail {
                        evaluator: evaluator.name().to_string(),
                        score: 0.0,
                        detail: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        (ScoreCard::from_scores(&scores), details)
    }
}

/// Passes when every install command in the log exited zero. A log with
/// no install commands passes vacuously.
pub struct InstallCheck;

#[async_trait]
impl Evaluator for InstallCheck {
    fn name(&self) -> &str {
        "install_success"
    }

    fn code_based(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> anyhow::Result<EvaluatorScore> {
        let installs: Vec<_> = ctx
            .command_log
            .iter()
            .filter(|entry| entry.command.contains("install"))
            .collect();
        if installs.is_empty() {
            return Ok(EvaluatorScore::with_detail(1.0, "no install commands ran"));
        }
        match installs.iter().find(|entry| !entry.succeeded()) {
            Some(failed) => Ok(EvaluatorScore::with_detail(
                0.0,
                format!(
                    "'{}' exited with code {}",
                    failed.command, failed.exit_code
                ),
            )),
            None => Ok(EvaluatorScore::new(1.0)),
        }
    }
}

/// Fraction of test commands that exited zero. No test commands means no
/// evidence of non-regression, which scores 0.
pub struct TestsCheck;

#[async_trait]
impl Evaluator for TestsCheck {
    fn name(&self) -> &str {
        "tests_nonregression"
    }

    fn code_based(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> anyhow::Result<EvaluatorScore> {
        let tests: Vec<_> = ctx
            .command_log
            .iter()
            .filter(|entry| entry.command.contains("test"))
            .collect();
        if tests.is_empty() {
            return Ok(EvaluatorScore::with_detail(0.0, "no test commands ran"));
        }
        let passed = tests.iter().filter(|entry| entry.succeeded()).count();
        let score = passed as f64 / tests.len() as f64;
        Ok(EvaluatorScore::with_detail(
            score,
            format!("{}/{} test commands passed", passed, tests.len()),
        ))
    }
}

const MANIFEST_FILES: [&str; 5] = [
    "package.json",
    "Cargo.toml",
    "requirements.txt",
    "pyproject.toml",
    "go.mod",
];

/// Fraction of the scenario's `dependency_targets` substrings found in the
/// workspace's dependency manifests.
pub struct DependencyTargets;

#[async_trait]
impl Evaluator for DependencyTargets {
    fn name(&self) -> &str {
        "dependency_targets"
    }

    fn code_based(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> anyhow::Result<EvaluatorScore> {
        let targets = &ctx.scenario.config.dependency_targets;
        if targets.is_empty() {
            return Ok(EvaluatorScore::with_detail(1.0, "no targets configured"));
        }
        let Some(workspace) = ctx.workspace else {
            return Ok(EvaluatorScore::with_detail(0.0, "no workspace to inspect"));
        };

        let mut manifests = String::new();
        for name in MANIFEST_FILES {
            let path = workspace.join(name);
            if path.is_file() {
                manifests.push_str(&tokio::fs::read_to_string(&path).await?);
                manifests.push('\n');
            }
        }
        if manifests.is_empty() {
            return Ok(EvaluatorScore::with_detail(
                0.0,
                "no dependency manifest found in workspace",
            ));
        }

        let missing: Vec<&str> = targets
            .iter()
            .filter(|t| !manifests.contains(t.as_str()))
            .map(String::as_str)
            .collect();
        let found = targets.len() - missing.len();
        let score = found as f64 / targets.len() as f64;
        let detail = if missing.is_empty() {
            format!("all {} targets present", targets.len())
        } else {
            format!("missing: {}", missing.join(", "))
        };
        Ok(EvaluatorScore::with_detail(score, detail))
    }
}

/// Grades the agent's answer against the task (and the oracle answer when
/// the scenario defines one) with a single judge call.
pub struct LlmJudge {
    adapter: Arc<dyn AgentAdapter>,
}

impl LlmJudge {
    pub fn new(adapter: Arc<dyn AgentAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Evaluator for LlmJudge {
    fn name(&self) -> &str {
        "llm_judge"
    }

    fn code_based(&self) -> bool {
        false
    }

    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> anyhow::Result<EvaluatorScore> {
        if !ctx.scenario.config.llm_judge_enabled() {
            return Ok(EvaluatorScore::with_detail(0.0, "disabled by scenario"));
        }

        let mut prompt = format!(
            "Task given to the agent:\n{}\n\nAgent's final answer:\n{}\n",
            ctx.tier_prompt, ctx.final_content
        );
        if let Some(oracle_path) = ctx.scenario.oracle_path() {
            let oracle = tokio::fs::read_to_string(&oracle_path).await?;
            prompt.push_str(&format!("\nReference answer:\n{}\n", oracle));
        }
        prompt.push_str(
            "\nGrade how well the agent's answer accomplishes the task. \
             Correctness dominates; completeness and clarity break ties. \
             Respond with only a JSON object: {\"score\": <0.0-1.0>, \"reasoning\": \"<one sentence>\"}",
        );

        let request = AgentRequest::new(vec![
            ChatMessage::system(
                "You are a strict software benchmark judge. You grade agent answers \
                 and respond only with the requested JSON object.",
            ),
            ChatMessage::user(prompt),
        ]);
        let response = self.adapter.send(request).await?;

        match parse_judge_score(&response.content) {
            Some((score, reasoning)) => Ok(EvaluatorScore {
                score,
                detail: reasoning,
            }),
            None => anyhow::bail!(
                "judge response contained no score: {}",
                crate::tools::truncate_output(&response.content, 200)
            ),
        }
    }
}

/// Extracts a 0..1 score (and optional reasoning) from judge output.
/// Accepts a bare JSON object, JSON embedded in prose, or as a last
/// resort the first numeric literal in the text.
pub fn parse_judge_score(content: &str) -> Option<(f64, Option<String>)> {
    #[derive(serde::Deserialize)]
    struct Verdict {
        score: f64,
        #[serde(default)]
        reasoning: Option<String>,
    }

    let trimmed = content.trim();
    if let Ok(verdict) = serde_json::from_str::<Verdict>(trimmed) {
        return Some((verdict.score.clamp(0.0, 1.0), verdict.reasoning));
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(verdict) = serde_json::from_str::<Verdict>(&trimmed[start..=end]) {
                return Some((verdict.score.clamp(0.0, 1.0), verdict.reasoning));
            }
        }
    }

    let number = Regex::new(r"(?:\d+\.\d+|\d+)").ok()?;
    let score: f64 = number.find(trimmed)?.as_str().parse().ok()?;
    Some((score.clamp(0.0, 1.0), None))
}

/// Cheap deterministic checks on the agent's behavior. Fraction of passed
/// checks; catches the obvious failure shapes the judge sometimes forgives.
pub struct HeuristicChecks;

#[async_trait]
impl Evaluator for HeuristicChecks {
    fn name(&self) -> &str {
        "heuristic_checks"
    }

    fn code_based(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> anyhow::Result<EvaluatorScore> {
        let lowered = ctx.final_content.to_lowercase();
        let mut failed = Vec::new();
        let mut total = 0;

        let mut check = |name: &'static str, passed: bool| {
            total += 1;
            if !passed {
                failed.push(name);
            }
        };

        check("answer_nonempty", !ctx.final_content.trim().is_empty());
        check(
            "no_refusal",
            !lowered.contains("i cannot") && !lowered.contains("i'm unable"),
        );
        check(
            "validation_clean",
            ctx.command_log
                .iter()
                .filter(|entry| !entry.command.contains("install"))
                .all(CommandLogEntry::succeeded),
        );
        if ctx.workspace.is_some() {
            check("used_tools", ctx.tool_calls > 0);
        }

        let score = (total - failed.len()) as f64 / total as f64;
        let detail = if failed.is_empty() {
            format!("all {} checks passed", total)
        } else {
            format!("failed: {}", failed.join(", "))
        };
        Ok(EvaluatorScore::with_detail(score, detail))
    }
}
