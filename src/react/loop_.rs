//! Orchestration Engine：有界的 Reason → Act → Observe 状态机
//!
//! 每轮把目标与完整 history 交给 Reasoner；Action 依次经过 Reflector、Normalizer、Executor，
//! 结果（包括否决与规范化失败产生的合成失败）追加进 history。最终回答进入 TerminalSuccess；
//! 达到步数上限或推理端不可用进入 TerminalAbort，连同完整 history 返回。
//! 引擎不关心重试策略：失败只是 history 中的普通条目，由推理端决定下一步。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::{AbortError, AbortReason, AgentError, EnginePhase, RecoveryAction, RecoveryEngine, RunContext};
use crate::memory::{find_pr_url, ExecutionHistory};
use crate::react::events::EngineEvent;
use crate::react::planner::{Reasoner, Step};
use crate::react::reflector::{Reflector, Verdict};
use crate::tools::call::{Action, ExecutionResult, FailureKind};
use crate::tools::executor::SandboxExecutor;
use crate::tools::normalizer::normalize_action;

/// 推理/行动循环上限
pub const DEFAULT_MAX_STEPS: usize = 50;

/// 成功终态的报告
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub run_id: Uuid,
    pub summary: String,
    /// 推理端报告的 PR 链接（回答中没有时取 history 中最近一次成功创建的 PR）
    pub pr_url: Option<String>,
    /// 该链接确实出现在成功的 create_github_pr 结果中
    pub pr_url_observed: bool,
    pub steps: usize,
    pub history: ExecutionHistory,
}

pub struct Engine {
    reasoner: Arc<dyn Reasoner>,
    reflector: Reflector,
    executor: Arc<SandboxExecutor>,
    recovery: RecoveryEngine,
    max_steps: usize,
    event_tx: Option<UnboundedSender<EngineEvent>>,
}

impl Engine {
    pub fn new(reasoner: Arc<dyn Reasoner>, reflector: Reflector, executor: Arc<SandboxExecutor>) -> Self {
        Self {
            reasoner,
            reflector,
            executor,
            recovery: RecoveryEngine::new(),
            max_steps: DEFAULT_MAX_STEPS,
            event_tx: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    fn send(&self, ev: EngineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    pub async fn run(&self, goal: &str) -> Result<FinalReport, AbortError> {
        let mut ctx = RunContext::new(goal);
        tracing::info!(run_id = %ctx.run_id, goal = %goal, max_steps = self.max_steps, "run started");
        self.send(EngineEvent::RunStarted {
            run_id: ctx.run_id,
            goal: goal.to_string(),
        });

        loop {
            if ctx.step >= self.max_steps {
                return Err(self.abort(ctx, AbortReason::StepLimit {
                    max_steps: self.max_steps,
                }));
            }
            ctx.step += 1;
            self.send(EngineEvent::StepStarted {
                step: ctx.step,
                max_steps: self.max_steps,
            });

            match self.reasoner.next_step(&ctx.goal, &ctx.history).await {
                Ok(Step::Finish(summary)) => {
                    ctx.transition(EnginePhase::TerminalSuccess);
                    return Ok(self.finish(ctx, summary));
                }
                Ok(Step::Act(action)) => {
                    ctx.transition(EnginePhase::Acting);
                    self.act(&mut ctx, action).await;
                }
                Err(err) => match self.recovery.handle(&err) {
                    RecoveryAction::RetryWithPrompt(hint) => {
                        tracing::warn!(step = ctx.step, error = %err, "unusable reasoner output");
                        self.send(EngineEvent::Rejected {
                            tool: String::new(),
                            reason: err.to_string(),
                        });
                        ctx.history.append(
                            ctx.step,
                            Action::unparsed(err.to_string()),
                            ExecutionResult::failure(FailureKind::Normalization, hint),
                        );
                        ctx.transition(EnginePhase::Reasoning);
                    }
                    RecoveryAction::Abort => {
                        return Err(self.abort(ctx, AbortReason::ReasonerUnavailable(err.to_string())));
                    }
                },
            }
        }
    }

    /// Reflector → Normalizer → Executor；任一环节拒绝都只产生一条失败记录
    async fn act(&self, ctx: &mut RunContext, action: Action) {
        self.send(EngineEvent::ToolProposed {
            tool: action.tool_name.clone(),
            args: serde_json::Value::Object(action.arguments.clone()),
        });

        if let Verdict::Veto(reason) = self.reflector.inspect(&action) {
            self.send(EngineEvent::Vetoed {
                tool: action.tool_name.clone(),
                reason: reason.to_string(),
            });
            let result = ExecutionResult::failure(FailureKind::Veto, self.hint(&AgentError::Veto(reason)));
            ctx.history.append(ctx.step, action, result);
            ctx.transition(EnginePhase::Reasoning);
            return;
        }

        let call = match normalize_action(&action) {
            Ok(call) => call,
            Err(e) => {
                tracing::info!(step = ctx.step, tool = %action.tool_name, error = %e, "tool call rejected");
                self.send(EngineEvent::Rejected {
                    tool: action.tool_name.clone(),
                    reason: e.to_string(),
                });
                let result =
                    ExecutionResult::failure(FailureKind::Normalization, self.hint(&AgentError::Normalization(e)));
                ctx.history.append(ctx.step, action, result);
                ctx.transition(EnginePhase::Reasoning);
                return;
            }
        };
        if !call.dropped_fields.is_empty() {
            tracing::debug!(tool = %call.kind(), dropped = ?call.dropped_fields, "unknown arguments dropped");
        }

        let result = self.executor.execute(&call).await;
        ctx.transition(EnginePhase::Observing);
        tracing::info!(
            step = ctx.step,
            tool = %call.kind(),
            ok = result.is_success(),
            "observed"
        );
        self.send(EngineEvent::Observed {
            step: ctx.step,
            tool: call.kind().name().to_string(),
            result: result.clone(),
        });
        ctx.history.append(ctx.step, action, result);
        ctx.transition(EnginePhase::Reasoning);
    }

    fn hint(&self, err: &AgentError) -> String {
        match self.recovery.handle(err) {
            RecoveryAction::RetryWithPrompt(msg) => msg,
            RecoveryAction::Abort => err.to_string(),
        }
    }

    fn finish(&self, ctx: RunContext, summary: String) -> FinalReport {
        debug_assert!(ctx.phase.is_terminal(), "finish from non-terminal phase {:?}", ctx.phase);
        let pr_url = find_pr_url(&summary).or_else(|| ctx.history.latest_pr_url());
        let pr_url_observed = pr_url
            .as_deref()
            .is_some_and(|url| ctx.history.observed_pr_url(url));
        tracing::info!(
            run_id = %ctx.run_id,
            steps = ctx.step,
            pr_url = ?pr_url,
            pr_url_observed,
            "run finished"
        );
        self.send(EngineEvent::Finished {
            summary: summary.clone(),
            pr_url: pr_url.clone(),
        });
        FinalReport {
            run_id: ctx.run_id,
            summary,
            pr_url,
            pr_url_observed,
            steps: ctx.step,
            history: ctx.history,
        }
    }

    fn abort(&self, mut ctx: RunContext, reason: AbortReason) -> AbortError {
        ctx.transition(EnginePhase::TerminalAbort);
        tracing::warn!(run_id = %ctx.run_id, steps = ctx.step, reason = %reason, "run aborted");
        self.send(EngineEvent::Aborted {
            reason: reason.to_string(),
        });
        AbortError {
            run_id: ctx.run_id,
            reason,
            steps: ctx.step,
            history: ctx.history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::react::mock::ScriptedReasoner;
    use crate::react::planner::Planner;
    use crate::tools::mock::{MockPullRequestApi, ScriptedRunner};
    use crate::tools::policy::CommandPolicy;
    use crate::tools::workspace::WorkspaceRoot;
    use serde_json::json;

    struct Harness {
        _dir: tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        executor: Arc<SandboxExecutor>,
    }

    fn harness(runner: ScriptedRunner) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path(), Some("/workspace".into())).unwrap();
        let runner = Arc::new(runner);
        let executor = Arc::new(SandboxExecutor::new(
            ws,
            runner.clone(),
            Arc::new(MockPullRequestApi::created("https://github.com/acme/app/pull/5")),
        ));
        Harness {
            _dir: dir,
            runner,
            executor,
        }
    }

    fn engine(h: &Harness, reasoner: Arc<dyn Reasoner>) -> Engine {
        let reflector = Reflector::new(
            CommandPolicy::default(),
            h.executor.workspace().path(),
            Some("/workspace".into()),
        );
        Engine::new(reasoner, reflector, h.executor.clone())
    }

    #[tokio::test]
    async fn test_abort_after_exactly_max_steps() {
        let h = harness(ScriptedRunner::new().on_exit("pytest", 1, "", "FAILED"));
        let reasoner = Arc::new(ScriptedReasoner::new(vec![Step::Act(Action::from_json(
            "run_shell_command",
            json!({"command": "pytest"}),
        ))]));
        let err = engine(&h, reasoner.clone()).run("fix tests").await.unwrap_err();
        assert_eq!(err.reason, AbortReason::StepLimit { max_steps: 50 });
        assert_eq!(reasoner.calls(), 50);
        // 每个周期恰好追加一条记录，下一次推理就能看到
        assert_eq!(reasoner.history_lengths(), (0..50).collect::<Vec<_>>());
        assert_eq!(err.history.len(), 50);
        assert_eq!(err.steps, 50);
        assert_eq!(h.runner.spawn_count(), 50);
    }

    #[tokio::test]
    async fn test_veto_records_failure_without_spawn() {
        let h = harness(ScriptedRunner::new());
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Step::Act(Action::from_json("run_shell_command", json!({"command": "vim app.py"}))),
            Step::Finish("gave up".into()),
        ]));
        let report = engine(&h, reasoner).run("edit").await.unwrap();
        assert_eq!(h.runner.spawn_count(), 0);
        let entry = &report.history.entries()[0];
        assert_eq!(entry.result.failure, Some(FailureKind::Veto));
        assert!(entry.result.output.contains("vim"));
        assert_eq!(report.pr_url, None);
        assert!(!report.pr_url_observed);
    }

    #[tokio::test]
    async fn test_normalization_failure_is_recorded() {
        let h = harness(ScriptedRunner::new());
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Step::Act(Action::from_json("create_github_pr", json!({"title": "x"}))),
            Step::Finish("done".into()),
        ]));
        let report = engine(&h, reasoner).run("pr").await.unwrap();
        let entry = &report.history.entries()[0];
        assert_eq!(entry.result.failure, Some(FailureKind::Normalization));
        assert!(entry.result.output.contains("source_branch"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_consumes_a_cycle() {
        let h = harness(ScriptedRunner::new());
        let llm = Arc::new(MockLlmClient::replying([
            r#"{"tool": "read_file", "args": {"path": "a.txt""#,
            r#"{"final_answer": "stopped"}"#,
        ]));
        let planner = Arc::new(Planner::new(llm, "system"));
        let report = engine(&h, planner).run("read").await.unwrap();
        assert_eq!(report.steps, 2);
        let entry = &report.history.entries()[0];
        assert_eq!(entry.action.tool_name, "");
        assert_eq!(entry.result.failure, Some(FailureKind::Normalization));
    }

    #[tokio::test]
    async fn test_reasoner_unavailable_aborts() {
        let h = harness(ScriptedRunner::new());
        let llm = Arc::new(MockLlmClient::new(vec![Err(LlmError::Transport("refused".into()))]));
        let planner = Arc::new(Planner::new(llm, "system"));
        let err = engine(&h, planner).run("anything").await.unwrap_err();
        assert!(matches!(err.reason, AbortReason::ReasonerUnavailable(_)));
        assert!(err.history.is_empty());
    }

    #[tokio::test]
    async fn test_pr_url_observed_flag() {
        let h = harness(ScriptedRunner::new());
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Step::Act(Action::from_json(
                "pr",
                json!({"head": "feat/deps", "base": "main", "pr_title": "Upgrade", "description": "Bump"}),
            )),
            Step::Finish("Opened https://github.com/acme/app/pull/5".into()),
        ]));
        let report = engine(&h, reasoner).run("pr").await.unwrap();
        assert_eq!(report.pr_url.as_deref(), Some("https://github.com/acme/app/pull/5"));
        assert!(report.pr_url_observed);

        let h = harness(ScriptedRunner::new());
        let reasoner = Arc::new(ScriptedReasoner::new(vec![Step::Finish(
            "Opened https://github.com/acme/app/pull/99".into(),
        )]));
        let report = engine(&h, reasoner).run("pr").await.unwrap();
        assert_eq!(report.pr_url.as_deref(), Some("https://github.com/acme/app/pull/99"));
        assert!(!report.pr_url_observed);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let h = harness(ScriptedRunner::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Step::Act(Action::from_json("list_files", json!({}))),
            Step::Finish("ok".into()),
        ]));
        engine(&h, reasoner).with_event_tx(tx).run("look").await.unwrap();
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec!["run_started", "step_started", "tool_proposed", "observed", "step_started", "finished"]
        );
    }
}
