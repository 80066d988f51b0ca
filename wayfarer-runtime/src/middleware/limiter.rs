use super::TurnContext;
use crate::events::LimitScope;
use crate::types::ConversationState;

/// Outcome of a limiter check for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Refuse { scope: LimitScope, limit: usize },
}

/// Caps tool calls per thread and per turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallLimiter {
    thread_limit: Option<usize>,
    run_limit: Option<usize>,
}

impl ToolCallLimiter {
    pub fn new(thread_limit: Option<usize>, run_limit: Option<usize>) -> Self {
        Self {
            thread_limit,
            run_limit,
        }
    }

    pub fn thread_limit(&self) -> Option<usize> {
        self.thread_limit
    }

    pub fn run_limit(&self) -> Option<usize> {
        self.run_limit
    }

    /// True once the thread budget is spent; tools stay off for the thread.
    pub fn thread_exhausted(&self, state: &ConversationState) -> bool {
        match self.thread_limit {
            Some(limit) => state.tools_disabled || state.tool_call_count >= limit,
            None => false,
        }
    }

    /// Check whether one more call fits. Thread budget is checked first.
    pub fn check(&self, state: &ConversationState, ctx: &TurnContext) -> Verdict {
        if let Some(limit) = self.thread_limit {
            if self.thread_exhausted(state) {
                return Verdict::Refuse {
                    scope: LimitScope::Thread,
                    limit,
                };
            }
        }
        if let Some(limit) = self.run_limit {
            if ctx.run_tool_calls >= limit {
                return Verdict::Refuse {
                    scope: LimitScope::Run,
                    limit,
                };
            }
        }
        Verdict::Allow
    }
}
