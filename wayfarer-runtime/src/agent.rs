//! Agent runtime: the turn loop and its streaming protocol.

use crate::agent_config::AgentConfig;
use crate::checkpoint::{CheckpointStore, TurnGuard};
use crate::error::{AgentError, ToolError};
use crate::events::{Diagnostic, LimitScope, Node, Payload, StreamEvent};
use crate::metrics::{Counter, Histogram, MetricTimer};
use crate::middleware::{MiddlewarePipeline, TurnContext, Verdict};
use crate::model::{ModelHandle, ModelRequest};
use crate::registry::ProviderRegistry;
use crate::tools::ToolSet;
use crate::types::{ConversationState, LLMResponse, Message, ThreadId, ToolCall};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Limits applied to every turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Model calls allowed per turn before it fails.
    pub max_steps: usize,
    pub tool_timeout: Duration,
    /// Events buffered ahead of a slow consumer.
    pub channel_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            tool_timeout: Duration::from_secs(30),
            channel_capacity: 32,
        }
    }
}

/// Lifecycle of one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Idle,
    Dispatched,
    Streaming,
    Completed,
    Failed,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnPhase::Completed | TurnPhase::Failed)
    }
}

/// Why a turn stopped early.
enum TurnStop {
    Cancelled,
    Failed(AgentError),
}

impl From<AgentError> for TurnStop {
    fn from(err: AgentError) -> Self {
        TurnStop::Failed(err)
    }
}

struct Inner {
    system_prompt: String,
    model: ModelHandle,
    tools: ToolSet,
    pipeline: MiddlewarePipeline,
    store: Arc<CheckpointStore>,
    settings: RuntimeSettings,
}

/// An executable agent: model, tools, middleware and checkpointing.
///
/// Cheap to clone; clones share the same configuration and store.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<Inner>,
}

impl AgentRuntime {
    pub fn model_id(&self) -> &str {
        self.inner.model.id()
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.inner.store
    }

    pub fn policies(&self) -> Vec<&'static str> {
        self.inner.pipeline.names()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.inner.tools.names()
    }

    /// Start a turn and stream its events.
    ///
    /// Returns `ConcurrentTurn` immediately if the thread is busy under the
    /// fail-fast policy. Dropping the returned stream cancels the turn after
    /// the step in progress.
    pub async fn stream(
        &self,
        user_message: impl Into<String>,
        thread_id: &ThreadId,
    ) -> Result<TurnStream, AgentError> {
        let guard = self.inner.store.begin_turn(thread_id).await?;

        let mut state = guard.load();
        state.messages.push(Message::user(user_message));
        guard.commit(&state);
        info!(thread_id = %thread_id, history = state.len(), "turn dispatched");

        let (events_tx, events_rx) = mpsc::channel(self.inner.settings.channel_capacity.max(1));
        let (phase_tx, phase_rx) = watch::channel(TurnPhase::Dispatched);
        let (result_tx, result_rx) = oneshot::channel();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner
                .run_turn(guard, state, events_tx, phase_tx, result_tx)
                .await;
        });

        Ok(TurnStream {
            thread_id: thread_id.clone(),
            events: events_rx,
            phase: phase_rx,
            result: Some(result_rx),
        })
    }

    /// Run a turn to completion and collect its events.
    pub async fn invoke(
        &self,
        user_message: impl Into<String>,
        thread_id: &ThreadId,
    ) -> Result<TurnOutcome, AgentError> {
        let mut stream = self.stream(user_message, thread_id).await?;
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }
        stream.finish().await?;

        let answer = events.iter().rev().find_map(|e| match (&e.node, &e.payload) {
            (Node::Model, Payload::Message(m)) if m.tool_calls().is_empty() => {
                m.as_text().map(str::to_string)
            }
            _ => None,
        });

        Ok(TurnOutcome {
            thread_id: thread_id.clone(),
            answer,
            events,
        })
    }
}

impl Inner {
    async fn run_turn(
        &self,
        guard: TurnGuard,
        mut state: ConversationState,
        events: mpsc::Sender<StreamEvent>,
        phase: watch::Sender<TurnPhase>,
        result: oneshot::Sender<Result<(), AgentError>>,
    ) {
        let _timer = MetricTimer::new(Histogram::TurnDuration);
        let thread_id = guard.thread_id().clone();
        phase.send_replace(TurnPhase::Streaming);

        let mut ctx = TurnContext::default();
        let outcome = self.drive(&guard, &mut state, &mut ctx, &events).await;

        let turn_result = match outcome {
            Ok(()) => {
                info!(
                    thread_id = %thread_id,
                    tool_calls = ctx.run_tool_calls,
                    history = state.len(),
                    "turn completed"
                );
                phase.send_replace(TurnPhase::Completed);
                Ok(())
            }
            Err(TurnStop::Cancelled) => {
                info!(thread_id = %thread_id, "stream dropped by caller, turn stopped");
                phase.send_replace(TurnPhase::Failed);
                Err(AgentError::TurnAborted("stream dropped by caller".to_string()))
            }
            Err(TurnStop::Failed(err)) => {
                error!(thread_id = %thread_id, error = %err, "turn failed");
                crate::metrics::increment(Counter::FailedTurns);
                let diagnostic = Diagnostic::Failed {
                    kind: err.failure_kind(),
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                };
                let _ = events
                    .send(StreamEvent::diagnostic(Node::Model, diagnostic))
                    .await;
                phase.send_replace(TurnPhase::Failed);
                Err(err)
            }
        };

        let _ = result.send(turn_result);
        drop(events);
        drop(guard);
    }

    async fn drive(
        &self,
        guard: &TurnGuard,
        state: &mut ConversationState,
        ctx: &mut TurnContext,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), TurnStop> {
        for step in 0..self.settings.max_steps {
            if events.is_closed() {
                return Err(TurnStop::Cancelled);
            }
            debug!("Model step {}/{}", step + 1, self.settings.max_steps);

            if let Some(diagnostic) = self.pipeline.before_model(state).await {
                guard.commit(state);
                emit(events, StreamEvent::diagnostic(Node::Summarizer, diagnostic)).await?;
            }

            let tools = if self.tools.is_empty() || !self.pipeline.tools_enabled(state) {
                Vec::new()
            } else {
                self.tools.schemas()
            };
            let request = ModelRequest {
                system_prompt: self.system_prompt.clone(),
                messages: state.messages.clone(),
                tools,
            };

            let reply = self.pipeline.call_model(&self.model, &request, ctx).await?;
            if let Some(diagnostic) = reply.fallback {
                emit(events, StreamEvent::diagnostic(Node::Fallback, diagnostic)).await?;
            }

            let calls = match reply.response {
                LLMResponse::Final { content } => {
                    let message = Message::assistant(content);
                    state.messages.push(message.clone());
                    guard.commit(state);
                    emit(events, StreamEvent::message(Node::Model, message)).await?;
                    return Ok(());
                }
                LLMResponse::ToolCalls { calls } if calls.is_empty() => {
                    return Err(TurnStop::Failed(AgentError::ModelUnavailable(
                        "model returned an empty tool call batch".to_string(),
                    )));
                }
                LLMResponse::ToolCalls { calls } => calls,
            };

            // Nothing has been dispatched yet; drop the batch unrecorded.
            if events.is_closed() {
                return Err(TurnStop::Cancelled);
            }

            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            info!("Model requested tools: {:?}", names);
            let request_message = Message::tool_request(calls.clone());
            state.messages.push(request_message.clone());
            guard.commit(state);

            // Once the request is committed every call gets a result, even if
            // the consumer goes away mid-batch.
            let mut outbox = Outbox::new(events);
            outbox
                .send(StreamEvent::message(Node::Model, request_message))
                .await;
            let run_limit_hit = self.run_tools(guard, state, ctx, &mut outbox, &calls).await;
            if outbox.consumer_gone() {
                return Err(TurnStop::Cancelled);
            }

            if let Some(limit) = run_limit_hit {
                let message = Message::assistant(budget_explanation(limit));
                state.messages.push(message.clone());
                guard.commit(state);
                emit(events, StreamEvent::message(Node::Model, message)).await?;
                return Ok(());
            }
        }

        Err(TurnStop::Failed(AgentError::StepLimitExceeded(
            self.settings.max_steps,
        )))
    }

    /// Run one batch of tool calls to the end, committing each result.
    /// Returns the run limit if it was hit.
    async fn run_tools(
        &self,
        guard: &TurnGuard,
        state: &mut ConversationState,
        ctx: &mut TurnContext,
        outbox: &mut Outbox<'_>,
        calls: &[ToolCall],
    ) -> Option<usize> {
        let mut run_limit_hit = None;

        for call in calls {
            match self.pipeline.check_tool_call(state, ctx) {
                Verdict::Allow => {
                    let message = self.execute_tool(call).await;
                    state.tool_call_count += 1;
                    ctx.run_tool_calls += 1;
                    state.messages.push(message.clone());
                    guard.commit(state);
                    outbox.send(StreamEvent::message(Node::Tool, message)).await;
                }
                Verdict::Refuse { scope, limit } => {
                    warn!(
                        tool = %call.name,
                        scope = %scope,
                        limit,
                        "tool call refused by limiter"
                    );
                    crate::metrics::increment(Counter::ToolRefusals);
                    match scope {
                        LimitScope::Thread => state.tools_disabled = true,
                        LimitScope::Run => run_limit_hit = Some(limit),
                    }
                    state
                        .messages
                        .push(Message::tool_result(call, refusal_text(scope, limit), true));
                    guard.commit(state);
                    let diagnostic = Diagnostic::ToolLimitReached {
                        scope,
                        limit,
                        tool: call.name.clone(),
                    };
                    outbox
                        .send(StreamEvent::diagnostic(Node::Tool, diagnostic))
                        .await;
                }
            }
        }

        run_limit_hit
    }

    /// Execute one tool call. Failures become error tool messages.
    async fn execute_tool(&self, call: &ToolCall) -> Message {
        let Some(spec) = self.tools.get(&call.name) else {
            warn!("Model requested unknown tool: {}", call.name);
            let err = ToolError::NotFound(call.name.clone());
            return Message::tool_result(call, err.to_string(), true);
        };

        let _timer = MetricTimer::new(Histogram::ToolLatency);
        let handler = Arc::clone(&spec.handler);
        let args = call.args.clone();
        let timeout = self.settings.tool_timeout;

        let task = tokio::spawn(async move { tokio::time::timeout(timeout, handler.invoke(args)).await });
        let outcome = match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ToolError::Timeout(timeout)),
            Err(join_err) => Err(ToolError::Execution(format!("tool crashed: {}", join_err))),
        };

        match outcome {
            Ok(output) => {
                debug!(tool = %call.name, bytes = output.len(), "tool succeeded");
                Message::tool_result(call, output, false)
            }
            Err(e) => {
                warn!("Tool execution failed: {}", e);
                Message::tool_result(call, e.to_string(), true)
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), TurnStop> {
    events.send(event).await.map_err(|_| TurnStop::Cancelled)
}

/// Event sender that keeps going after the consumer hangs up.
struct Outbox<'a> {
    events: &'a mpsc::Sender<StreamEvent>,
    gone: bool,
}

impl<'a> Outbox<'a> {
    fn new(events: &'a mpsc::Sender<StreamEvent>) -> Self {
        Self {
            events,
            gone: false,
        }
    }

    async fn send(&mut self, event: StreamEvent) {
        if !self.gone && self.events.send(event).await.is_err() {
            debug!("event consumer gone, finishing tool batch");
            self.gone = true;
        }
    }

    fn consumer_gone(&self) -> bool {
        self.gone || self.events.is_closed()
    }
}

fn refusal_text(scope: LimitScope, limit: usize) -> String {
    format!(
        "Tool call not executed: the {} tool-call limit of {} has been reached.",
        scope, limit
    )
}

fn budget_explanation(limit: usize) -> String {
    format!(
        "I reached the limit of {} tool calls for this request, so I stopped before \
         finishing the lookup. Send a follow-up message and I will continue from here.",
        limit
    )
}

/// Live events of one turn.
pub struct TurnStream {
    thread_id: ThreadId,
    events: mpsc::Receiver<StreamEvent>,
    phase: watch::Receiver<TurnPhase>,
    result: Option<oneshot::Receiver<Result<(), AgentError>>>,
}

impl TurnStream {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Current phase of the turn.
    pub fn phase(&self) -> TurnPhase {
        *self.phase.borrow()
    }

    /// Watch handle for phase changes.
    pub fn phase_watch(&self) -> watch::Receiver<TurnPhase> {
        self.phase.clone()
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Wait for the turn to end and return its result. Drains unread events.
    pub async fn finish(mut self) -> Result<(), AgentError> {
        while self.events.recv().await.is_some() {}
        match self.result.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(AgentError::TurnAborted("turn task ended unexpectedly".to_string()))
            }),
            None => Err(AgentError::TurnAborted("turn result already taken".to_string())),
        }
    }
}

impl Stream for TurnStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Everything a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub thread_id: ThreadId,
    /// Last assistant text, if any.
    pub answer: Option<String>,
    pub events: Vec<StreamEvent>,
}

impl TurnOutcome {
    /// The run budget error, if the limiter cut this turn short.
    pub fn budget_exceeded(&self) -> Option<AgentError> {
        self.events.iter().find_map(|e| match e.as_diagnostic() {
            Some(Diagnostic::ToolLimitReached {
                scope: LimitScope::Run,
                limit,
                ..
            }) => Some(AgentError::ToolBudgetExceeded {
                scope: LimitScope::Run,
                limit: *limit,
            }),
            _ => None,
        })
    }

    pub fn fallback_engaged(&self) -> bool {
        self.events.iter().any(|e| e.node == Node::Fallback)
    }

    /// Tool result messages in arrival order.
    pub fn tool_results(&self) -> Vec<&Message> {
        self.events
            .iter()
            .filter(|e| e.node == Node::Tool)
            .filter_map(StreamEvent::as_message)
            .collect()
    }
}

/// Assembles an `AgentRuntime` from an `AgentConfig`.
pub struct AgentBuilder {
    config: AgentConfig,
    registry: Arc<ProviderRegistry>,
    store: Option<Arc<CheckpointStore>>,
    settings: RuntimeSettings,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            registry,
            store: None,
            settings: RuntimeSettings::default(),
        }
    }

    /// Share a checkpoint store. Without one the runtime gets a private store.
    pub fn checkpointer(mut self, store: Arc<CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolve every model and validate settings.
    pub fn build(self) -> Result<AgentRuntime, AgentError> {
        if self.settings.max_steps == 0 {
            return Err(crate::error::ConfigError::Invalid(
                "max_steps must be at least 1".to_string(),
            )
            .into());
        }

        let model = self
            .registry
            .resolve(&self.config.provider, &self.config.model)?;
        let tools = ToolSet::new(self.config.tools.clone())?;
        let pipeline = MiddlewarePipeline::from_settings(&self.config.middleware, &self.registry)?;

        info!(
            model = %model.id(),
            tools = tools.len(),
            policies = ?pipeline.names(),
            "agent runtime built"
        );

        Ok(AgentRuntime {
            inner: Arc::new(Inner {
                system_prompt: self.config.system_prompt,
                model,
                tools,
                pipeline,
                store: self.store.unwrap_or_default(),
                settings: self.settings,
            }),
        })
    }
}
