//! 编排器：固定的生成 → 批评 → 精炼循环，以及按角色排列的动态流水线
//!
//! 两种模式都严格串行：一次运行内不会并发调用两个 agent。每次调用经 AgentExecutor 完成，
//! 以 agent_start → token* → agent_complete 包裹；调用失败产生一个 error 事件并中止运行（不再有 done）。

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::{prompts, verdict, BridgeEvent, EventType, PipelineState, PipelineStep, SessionError};
use crate::session::{AgentExecutor, CallOptions};

/// 事件流：惰性、有限，只能消费一次
pub type EventStream = Pin<Box<dyn Stream<Item = BridgeEvent> + Send>>;

/// 编排参数（由配置生成，运行期不可变）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 固定循环中负责生成与精炼的 agent
    pub generator: String,
    /// 固定循环中负责批评的 agent
    pub critic: String,
    pub max_iterations: u32,
    /// 每块读取超时
    pub timeout: Duration,
    /// 流水线 generator 摘要里每个 agent 的最大字符数
    pub summary_cap_chars: usize,
    /// 批评后由 generator 裁决，满意即提前结束
    pub verdict_check: bool,
    pub rubric: String,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            generator: cfg.orchestrator.generator.clone(),
            critic: cfg.orchestrator.critic.clone(),
            max_iterations: cfg.orchestrator.max_iterations,
            timeout: Duration::from_secs(cfg.orchestrator.timeout_secs),
            summary_cap_chars: cfg.orchestrator.summary_cap_chars,
            verdict_check: cfg.orchestrator.verdict_check,
            rubric: cfg.rubric.render(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct BridgeOrchestrator {
    executor: Arc<dyn AgentExecutor>,
    settings: Arc<OrchestratorSettings>,
}

impl BridgeOrchestrator {
    pub fn new(executor: Arc<dyn AgentExecutor>, settings: OrchestratorSettings) -> Self {
        Self {
            executor,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// 固定循环：生成一次，然后每轮批评、（非最后一轮）精炼
    pub fn run(
        &self,
        query: &str,
        max_iterations: u32,
        skip_critique: bool,
        context: Option<String>,
    ) -> EventStream {
        let executor = Arc::clone(&self.executor);
        let settings = Arc::clone(&self.settings);
        let query = query.to_string();
        let run_id = Uuid::new_v4();

        Box::pin(async_stream::stream! {
            tracing::info!(run_id = %run_id, max_iterations, skip_critique, "Bridge run started");
            yield BridgeEvent::status("Initializing Bridge Protocol...");
            yield BridgeEvent::status(format!("Phase 1: Generation ({})", settings.generator));

            let prompt = prompts::generation(&query, &settings.rubric, context.as_deref());
            let turn = Turn::new(&settings.generator, prompt, CallOptions::new(settings.timeout), EventType::Token);
            let output = TurnOutput::default();
            for await event in agent_turn(Arc::clone(&executor), turn, output.clone()) {
                yield event;
            }
            let mut response = match output.take() {
                Some(text) => text,
                None => return,
            };

            if response.trim().is_empty() {
                tracing::warn!(run_id = %run_id, agent_id = %settings.generator, "empty initial generation");
                yield BridgeEvent::error("Initial generation failed or returned empty response.");
                return;
            }

            if skip_critique || max_iterations < 1 {
                tracing::info!(run_id = %run_id, "Bridge run complete (no critique)");
                yield BridgeEvent::done(response);
                return;
            }

            for iteration in 1..=max_iterations {
                yield BridgeEvent::iteration(iteration, max_iterations);
                yield BridgeEvent::status(format!("Phase 2: Critical Analysis ({})", settings.critic))
                    .with_iteration(iteration);

                let prompt = prompts::critique(&query, &response);
                let turn = Turn::new(&settings.critic, prompt, CallOptions::new(settings.timeout), EventType::Critique)
                    .at(Some(iteration), None);
                let output = TurnOutput::default();
                for await event in agent_turn(Arc::clone(&executor), turn, output.clone()) {
                    yield event;
                }
                let critique = match output.take() {
                    Some(text) => text,
                    None => return,
                };

                if settings.verdict_check {
                    yield BridgeEvent::status(format!("Phase 3: Evaluation ({})", settings.generator))
                        .with_iteration(iteration);
                    let prompt = prompts::verdict(&query, &settings.rubric, &response, &critique);
                    let turn = Turn::new(&settings.generator, prompt, CallOptions::new(settings.timeout), EventType::Token)
                        .at(Some(iteration), None);
                    let output = TurnOutput::default();
                    for await event in agent_turn(Arc::clone(&executor), turn, output.clone()) {
                        yield event;
                    }
                    let evaluation = match output.take() {
                        Some(text) => text,
                        None => return,
                    };
                    if let Some(v) = verdict::extract_verdict(&evaluation).filter(|v| v.satisfied) {
                        tracing::info!(run_id = %run_id, iteration, "Bridge run satisfied early");
                        let payload = v
                            .best_answer
                            .filter(|a| !a.trim().is_empty())
                            .unwrap_or(response);
                        yield BridgeEvent::done(payload)
                            .with_satisfied(true)
                            .with_iteration(iteration);
                        return;
                    }
                }

                if iteration == max_iterations {
                    break;
                }

                yield BridgeEvent::status(format!("Phase 3: Refinement ({})", settings.generator))
                    .with_iteration(iteration);
                let prompt = prompts::refinement(&query, &settings.rubric, &response, &critique);
                let turn = Turn::new(&settings.generator, prompt, CallOptions::new(settings.timeout), EventType::Refinement)
                    .at(Some(iteration), None);
                let output = TurnOutput::default();
                for await event in agent_turn(Arc::clone(&executor), turn, output.clone()) {
                    yield event;
                }
                match output.take() {
                    Some(refined) if !refined.trim().is_empty() => response = refined,
                    Some(_) => {
                        tracing::warn!(run_id = %run_id, iteration, "empty refinement, keeping previous response");
                    }
                    None => return,
                }
            }

            tracing::info!(run_id = %run_id, "Bridge run complete");
            yield BridgeEvent::done(response);
        })
    }

    /// 动态流水线：每轮按顺序执行全部步骤，输出按 agent id 累积
    pub fn run_pipeline(
        &self,
        query: &str,
        steps: Vec<PipelineStep>,
        context: Option<String>,
        max_iterations: u32,
    ) -> EventStream {
        let executor = Arc::clone(&self.executor);
        let settings = Arc::clone(&self.settings);
        let query = query.to_string();
        let run_id = Uuid::new_v4();
        let iterations = max_iterations.max(1);

        Box::pin(async_stream::stream! {
            if steps.is_empty() {
                yield BridgeEvent::error("Pipeline has no steps.");
                return;
            }
            tracing::info!(run_id = %run_id, steps = steps.len(), iterations, "Pipeline run started");
            yield BridgeEvent::status(format!(
                "Starting pipeline: {} step(s) x {} iteration(s)",
                steps.len(),
                iterations
            ));

            let total = steps.len();
            let mut state = PipelineState::default();
            for iteration in 1..=iterations {
                yield BridgeEvent::iteration(iteration, iterations);
                for (index, step) in steps.iter().enumerate() {
                    let step_no = index as u32 + 1;
                    yield BridgeEvent::from_agent(&step.agent_id, EventType::PipelineStep)
                        .with_content(format!("Step {}/{}: {} ({})", step_no, total, step.agent_id, step.role))
                        .with_iteration(iteration)
                        .with_step(step_no);

                    let prompt = prompts::pipeline_step(
                        step.role,
                        &query,
                        iteration,
                        &state,
                        &settings.rubric,
                        context.as_deref(),
                        settings.summary_cap_chars,
                    );
                    let options = CallOptions::new(settings.timeout).with_model(step.model.clone());
                    let turn = Turn::new(&step.agent_id, prompt, options, EventType::Token)
                        .at(Some(iteration), Some(step_no));
                    let output = TurnOutput::default();
                    for await event in agent_turn(Arc::clone(&executor), turn, output.clone()) {
                        yield event;
                    }
                    match output.take() {
                        Some(text) => state.record(step, text),
                        None => return,
                    }
                }
            }

            tracing::info!(run_id = %run_id, "Pipeline run complete");
            yield BridgeEvent::done(state.final_response());
        })
    }
}

/// 一次 agent 调用及其事件标注
struct Turn {
    agent_id: String,
    prompt: String,
    options: CallOptions,
    token_kind: EventType,
    iteration: Option<u32>,
    step: Option<u32>,
}

impl Turn {
    fn new(agent_id: &str, prompt: String, options: CallOptions, token_kind: EventType) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            prompt,
            options,
            token_kind,
            iteration: None,
            step: None,
        }
    }

    fn at(mut self, iteration: Option<u32>, step: Option<u32>) -> Self {
        self.iteration = iteration;
        self.step = step;
        self
    }

    fn tag(&self, mut event: BridgeEvent) -> BridgeEvent {
        event.iteration = self.iteration;
        event.step = self.step;
        event
    }

    fn event(&self, kind: EventType) -> BridgeEvent {
        self.tag(BridgeEvent::from_agent(&self.agent_id, kind))
    }

    fn failure(&self, err: &SessionError) -> BridgeEvent {
        let mut event = self.tag(BridgeEvent::error(err.to_string()));
        event.agent_id = Some(self.agent_id.clone());
        event
    }
}

/// 调用成功结束时写入完整输出；失败时保持为空
#[derive(Clone, Default)]
struct TurnOutput(Arc<Mutex<Option<String>>>);

impl TurnOutput {
    fn set(&self, text: String) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(text);
    }

    fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

fn agent_turn(
    executor: Arc<dyn AgentExecutor>,
    turn: Turn,
    output_slot: TurnOutput,
) -> impl Stream<Item = BridgeEvent> + Send {
    async_stream::stream! {
        let started = Instant::now();
        yield turn.event(EventType::AgentStart).with_content(format!("{} started", turn.agent_id));

        let mut chunks = match executor.execute(&turn.agent_id, &turn.prompt, &turn.options).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(agent_id = %turn.agent_id, "agent call rejected: {}", e);
                yield turn.failure(&e);
                return;
            }
        };

        let mut output = String::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => {
                    output.push_str(&text);
                    yield turn.event(turn.token_kind).with_content(text);
                }
                Err(e) => {
                    tracing::warn!(agent_id = %turn.agent_id, "agent call failed: {}", e);
                    yield turn.failure(&e);
                    return;
                }
            }
        }

        tracing::debug!(
            agent_id = %turn.agent_id,
            chars = output.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "agent call complete"
        );
        yield turn.event(EventType::AgentComplete).with_content(format!(
            "{} finished in {:.1}s",
            turn.agent_id,
            started.elapsed().as_secs_f64()
        ));
        output_slot.set(output);
    }
}
