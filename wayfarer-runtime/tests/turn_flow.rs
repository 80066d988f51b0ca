#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end turn flow through the runtime and chat session.

mod common;

use common::*;
use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wayfarer_runtime::*;

#[tokio::test]
async fn test_tokyo_weather_end_to_end() {
    let model = ScriptedModel::new(
        "groq:llama-3.3-70b-versatile",
        vec![
            call("web_search", json!({"query": "Tokyo weather today"})),
            answer("It is 18°C and clear in Tokyo."),
        ],
    );
    let searches = Arc::new(AtomicUsize::new(0));
    let config = AgentConfig::new("groq", "llama-3.3-70b-versatile", "You are a travel assistant.")
        .with_tool(fake_search(searches.clone()))
        .with_middleware(limits(None, Some(6)));
    let store = Arc::new(CheckpointStore::default());

    let mut session = ChatSession::new(config, registry(&[model.clone()]), store.clone())
        .with_thread_id(ThreadId::from("t1"));

    let mut seen = Vec::new();
    session
        .submit("What's the weather in Tokyo?", |entry| seen.push(entry.clone()))
        .await
        .unwrap();

    let transcript = session.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(seen.as_slice(), transcript);
    assert!(matches!(&transcript[0], TranscriptEntry::User { text } if text == "What's the weather in Tokyo?"));
    match &transcript[1] {
        TranscriptEntry::ToolInvocation(inv) => {
            assert_eq!(inv.name, "web_search");
            assert_eq!(inv.input["query"], "Tokyo weather today");
            assert!(inv.output.as_deref().unwrap().contains("18°C"));
        }
        other => panic!("expected tool invocation, got {:?}", other),
    }
    assert!(matches!(&transcript[2], TranscriptEntry::Assistant { text } if text.contains("Tokyo")));
    assert_eq!(searches.load(Ordering::SeqCst), 1);

    let state = store.load(&ThreadId::from("t1"));
    let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(state.messages[2].tool_call_id.as_deref(), Some(state.messages[1].tool_calls()[0].id.as_str()));

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].system_prompt, "You are a travel assistant.");
    assert_eq!(requests[1].messages.len(), 3);
}

#[tokio::test]
async fn test_thread_accumulates_turns_in_order() {
    let turns = 4;
    let script = (0..turns).map(|i| answer(&format!("answer {}", i))).collect();
    let model = ScriptedModel::new("mock:chat", script);
    let runtime = AgentBuilder::new(AgentConfig::new("mock", "chat", ""), registry(&[model]))
        .build()
        .unwrap();
    let thread = ThreadId::from("t-multi");

    for i in 0..turns {
        let outcome = runtime.invoke(format!("question {}", i), &thread).await.unwrap();
        assert_eq!(outcome.answer, Some(format!("answer {}", i)));
    }

    let state = runtime.store().load(&thread);
    assert_eq!(state.count_role(Role::User), turns);
    assert_eq!(state.len(), turns * 2);
    for i in 0..turns {
        assert_eq!(state.messages[i * 2].as_text(), Some(format!("question {}", i).as_str()));
        assert_eq!(state.messages[i * 2 + 1].as_text(), Some(format!("answer {}", i).as_str()));
    }
}

#[tokio::test]
async fn test_history_survives_runtime_rebuild() {
    let model = ScriptedModel::new("mock:chat", vec![answer("one"), answer("two")]);
    let registry = registry(&[model.clone()]);
    let store = Arc::new(CheckpointStore::default());
    let mut session = ChatSession::new(AgentConfig::new("mock", "chat", "first"), registry, store);

    session.send("hello").await.unwrap();
    session.reconfigure(AgentConfig::new("mock", "chat", "second"));
    session.send("again").await.unwrap();

    assert_eq!(session.state().len(), 4);
    let last = model.requests().pop().unwrap();
    assert_eq!(last.system_prompt, "second");
    assert_eq!(last.messages.len(), 3);
}

#[tokio::test]
async fn test_tool_error_is_fed_back_to_model() {
    let model = ScriptedModel::new(
        "mock:chat",
        vec![call("flaky", json!({})), answer("The lookup failed, sorry.")],
    );
    let flaky = ToolSpec::from_fn("flaky", "Always fails", json!({}), |_| async {
        Err(ToolError::Execution("upstream 503".to_string()))
    });
    let runtime = AgentBuilder::new(
        AgentConfig::new("mock", "chat", "").with_tool(flaky),
        registry(&[model.clone()]),
    )
    .build()
    .unwrap();

    let outcome = runtime.invoke("try it", &ThreadId::from("t1")).await.unwrap();
    let results = outcome.tool_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_error());
    assert!(results[0].as_text().unwrap().contains("upstream 503"));

    let second = &model.requests()[1];
    assert_eq!(second.messages.last().unwrap().role, Role::Tool);
}

#[tokio::test]
async fn test_dropping_stream_stops_after_current_step() {
    let model = ScriptedModel::slow(
        "mock:chat",
        vec![call("web_search", json!({"query": "kyoto"})), answer("unused")],
        Duration::from_millis(30),
    );
    let searches = Arc::new(AtomicUsize::new(0));
    let runtime = AgentBuilder::new(
        AgentConfig::new("mock", "chat", "").with_tool(fake_search(searches.clone())),
        registry(&[model.clone()]),
    )
    .settings(RuntimeSettings {
        channel_capacity: 1,
        ..Default::default()
    })
    .build()
    .unwrap();
    let thread = ThreadId::from("t-cancel");

    let mut stream = runtime.stream("Plan Kyoto", &thread).await.unwrap();
    let first = stream.next().await.unwrap();
    assert_eq!(first.node, Node::Model);
    drop(stream);

    // Wait for the turn task to notice and release the thread.
    for _ in 0..100 {
        if !runtime.store().is_busy(&thread) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!runtime.store().is_busy(&thread));

    // The dispatched tool finished and was persisted; no further model call ran.
    let state = runtime.store().load(&thread);
    assert_requests_answered(&state);
    assert_eq!(searches.load(Ordering::SeqCst), 1);
    assert_eq!(state.messages.last().unwrap().role, Role::Tool);
    assert_eq!(model.calls(), 1);
}

/// Every assistant tool request in `state` is followed by one result per call.
fn assert_requests_answered(state: &ConversationState) {
    for (i, message) in state.messages.iter().enumerate() {
        let calls = message.tool_calls();
        for (offset, call) in calls.iter().enumerate() {
            let result = state
                .messages
                .get(i + 1 + offset)
                .unwrap_or_else(|| panic!("no result for tool call {}", call.id));
            assert_eq!(result.role, Role::Tool);
            assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
    }
}

#[tokio::test]
async fn test_dropping_stream_during_model_call_leaves_no_open_request() {
    let model = ScriptedModel::slow(
        "mock:chat",
        vec![
            call("web_search", json!({"query": "kyoto"})),
            answer("Kyoto is sunny."),
        ],
        Duration::from_millis(50),
    );
    let searches = Arc::new(AtomicUsize::new(0));
    let runtime = AgentBuilder::new(
        AgentConfig::new("mock", "chat", "").with_tool(fake_search(searches.clone())),
        registry(&[model.clone()]),
    )
    .build()
    .unwrap();
    let thread = ThreadId::from("t-early-drop");

    let stream = runtime.stream("Plan Kyoto", &thread).await.unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    drop(stream);

    for _ in 0..100 {
        if !runtime.store().is_busy(&thread) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!runtime.store().is_busy(&thread));

    let state = runtime.store().load(&thread);
    assert_requests_answered(&state);
    assert_eq!(state.messages.last().unwrap().role, Role::User);
    assert_eq!(searches.load(Ordering::SeqCst), 0);
    assert_eq!(model.calls(), 1);

    // The thread stays usable for the next turn.
    let outcome = runtime.invoke("Still there?", &thread).await.unwrap();
    assert_eq!(outcome.answer.as_deref(), Some("Kyoto is sunny."));
    assert_requests_answered(&runtime.store().load(&thread));
}

#[tokio::test]
async fn test_events_carry_nodes_in_order() {
    let model = ScriptedModel::new(
        "mock:chat",
        vec![call("web_search", json!({"query": "osaka"})), answer("done")],
    );
    let runtime = AgentBuilder::new(
        AgentConfig::new("mock", "chat", "")
            .with_tool(fake_search(Arc::new(AtomicUsize::new(0)))),
        registry(&[model]),
    )
    .build()
    .unwrap();

    let stream = runtime.stream("Osaka?", &ThreadId::from("t1")).await.unwrap();
    let nodes: Vec<Node> = stream.map(|e| e.node).collect().await;
    assert_eq!(nodes, vec![Node::Model, Node::Tool, Node::Model]);
}
