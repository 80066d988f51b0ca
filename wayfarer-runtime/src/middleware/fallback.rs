use super::TurnContext;
use crate::error::AgentError;
use crate::events::Diagnostic;
use crate::model::{ModelHandle, ModelRequest};
use crate::types::LLMResponse;
use tracing::{error, warn};

/// Secondary model tried once when the primary fails with a retryable error.
pub struct ModelFallback {
    secondary: ModelHandle,
}

impl ModelFallback {
    pub fn new(secondary: ModelHandle) -> Self {
        Self { secondary }
    }

    pub fn secondary_id(&self) -> &str {
        self.secondary.id()
    }
}

/// A model response plus the fallback notice, if fallback engaged on this call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub response: LLMResponse,
    pub fallback: Option<Diagnostic>,
}

pub(super) async fn call_with_fallback(
    fallback: Option<&ModelFallback>,
    primary: &ModelHandle,
    request: &ModelRequest,
    ctx: &mut TurnContext,
) -> Result<ModelReply, AgentError> {
    if let (true, Some(fb)) = (ctx.on_secondary, fallback) {
        let response = fb.secondary.invoke(request).await.map_err(|e| {
            error!(model = %fb.secondary.id(), error = %e, "secondary model failed");
            AgentError::ModelUnavailable(format!("{}: {}", fb.secondary.id(), e))
        })?;
        return Ok(ModelReply {
            response,
            fallback: None,
        });
    }

    let primary_err = match primary.invoke(request).await {
        Ok(response) => {
            return Ok(ModelReply {
                response,
                fallback: None,
            })
        }
        Err(e) => e,
    };

    let fb = match fallback {
        Some(fb) if primary_err.is_retryable() => fb,
        _ => {
            error!(model = %primary.id(), error = %primary_err, "model call failed");
            return Err(AgentError::ModelUnavailable(format!(
                "{}: {}",
                primary.id(),
                primary_err
            )));
        }
    };

    warn!(
        primary = %primary.id(),
        secondary = %fb.secondary.id(),
        error = %primary_err,
        "primary model failed, retrying on fallback"
    );
    crate::metrics::increment(crate::metrics::Counter::Fallbacks);
    ctx.on_secondary = true;

    match fb.secondary.invoke(request).await {
        Ok(response) => Ok(ModelReply {
            response,
            fallback: Some(Diagnostic::FallbackEngaged {
                primary: primary.id().to_string(),
                secondary: fb.secondary.id().to_string(),
                reason: primary_err.to_string(),
            }),
        }),
        Err(e) => {
            error!(model = %fb.secondary.id(), error = %e, "fallback model failed");
            Err(AgentError::ModelUnavailable(format!(
                "{} failed ({}); fallback {} failed ({})",
                primary.id(),
                primary_err,
                fb.secondary.id(),
                e
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model::ChatModel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingModel {
        id: &'static str,
        error: Option<ModelError>,
        calls: AtomicUsize,
    }

    impl CountingModel {
        fn ok(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                error: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(id: &'static str, error: ModelError) -> Arc<Self> {
            Arc::new(Self {
                id,
                error: Some(error),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for CountingModel {
        fn id(&self) -> &str {
            self.id
        }

        async fn invoke(&self, _request: &ModelRequest) -> Result<LLMResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(LLMResponse::Final {
                    content: format!("from {}", self.id),
                }),
            }
        }
    }

    fn request() -> ModelRequest {
        ModelRequest {
            system_prompt: String::new(),
            messages: vec![],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let primary = CountingModel::ok("p:1");
        let secondary = CountingModel::ok("s:1");
        let fb = ModelFallback::new(secondary.clone());
        let primary_handle: ModelHandle = primary.clone();
        let mut ctx = TurnContext::default();

        let reply = call_with_fallback(Some(&fb), &primary_handle, &request(), &mut ctx)
            .await
            .unwrap();
        assert!(reply.fallback.is_none());
        assert_eq!(secondary.calls(), 0);
        assert!(!ctx.on_secondary);
    }

    #[tokio::test]
    async fn test_timeout_retries_once_and_sticks() {
        let primary = CountingModel::failing("p:1", ModelError::Timeout("60s".into()));
        let secondary = CountingModel::ok("s:1");
        let fb = ModelFallback::new(secondary.clone());
        let primary_handle: ModelHandle = primary.clone();
        let mut ctx = TurnContext::default();

        let reply = call_with_fallback(Some(&fb), &primary_handle, &request(), &mut ctx)
            .await
            .unwrap();
        assert!(matches!(
            reply.fallback,
            Some(Diagnostic::FallbackEngaged { .. })
        ));
        assert!(ctx.on_secondary);

        let reply = call_with_fallback(Some(&fb), &primary_handle, &request(), &mut ctx)
            .await
            .unwrap();
        assert!(reply.fallback.is_none());
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 2);
    }

    #[tokio::test]
    async fn test_both_fail_is_unavailable() {
        let primary = CountingModel::failing("p:1", ModelError::Timeout("60s".into()));
        let secondary = CountingModel::failing("s:1", ModelError::Timeout("60s".into()));
        let fb = ModelFallback::new(secondary.clone());
        let primary_handle: ModelHandle = primary.clone();
        let mut ctx = TurnContext::default();

        let err = call_with_fallback(Some(&fb), &primary_handle, &request(), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable(_)));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_skips_fallback() {
        let primary = CountingModel::failing("p:1", ModelError::Rejected("400".into()));
        let secondary = CountingModel::ok("s:1");
        let fb = ModelFallback::new(secondary.clone());
        let primary_handle: ModelHandle = primary.clone();
        let mut ctx = TurnContext::default();

        let err = call_with_fallback(Some(&fb), &primary_handle, &request(), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable(_)));
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_fallback_configured() {
        let primary = CountingModel::failing("p:1", ModelError::Unavailable("503".into()));
        let primary_handle: ModelHandle = primary.clone();
        let mut ctx = TurnContext::default();
        let err = call_with_fallback(None, &primary_handle, &request(), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable(_)));
    }
}
