//! End-to-end turns through the orchestrator with scripted generation services

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::time::{sleep, Duration};
use tower::{service_fn, BoxError};

use tower_handoff::provider::boxed;
use tower_handoff::resilience::{GenerationError, ServiceErrorKind};
use tower_handoff::{
    default_registry, ConversationStore, GenerationRequest, GenerationResponse, GenerationSvc,
    Orchestrator, Role, RouterConfig, RouterError, RoutingStrategy, ScriptedProvider, TurnState,
};

fn decision(label: &str) -> GenerationResponse {
    GenerationResponse::structured(json!({ "next_agent": label, "reasoning": "scripted" }))
}

fn orchestrator(provider: &ScriptedProvider, config: RouterConfig) -> Orchestrator {
    Orchestrator::from_config(config, boxed(provider.clone()), Arc::new(default_registry()))
        .unwrap()
}

#[tokio::test]
async fn account_help_goes_to_support() {
    let provider = ScriptedProvider::responses(vec![
        decision("support_agent"),
        GenerationResponse::text("Let's look at your account."),
    ]);
    let orch = orchestrator(&provider, RouterConfig::default());

    let outcome = orch
        .handle_turn("conversation-1", "I need help with my account")
        .await
        .unwrap();

    let thread = orch.store().get("conversation-1").await.unwrap();
    assert_eq!(thread.current_agent.as_deref(), Some("support_agent"));
    let agent_turns: Vec<_> = thread
        .turns
        .iter()
        .filter(|t| t.role == Role::Agent)
        .collect();
    assert_eq!(agent_turns.len(), 1);
    assert_eq!(agent_turns[0].source_agent.as_deref(), Some("support_agent"));
    assert_eq!(outcome.replies.len(), 1);
}

#[tokio::test]
async fn goodbye_terminates_without_agent_turn() {
    let provider = ScriptedProvider::responses(vec![decision("__end__")]);
    let orch = orchestrator(&provider, RouterConfig::default());

    let outcome = orch.handle_turn("t", "Thanks, goodbye!").await.unwrap();
    assert_eq!(outcome.final_state, TurnState::Terminated);
    assert!(outcome.replies.is_empty());
    assert_eq!(outcome.transitions, 0);
    assert_eq!(provider.requests().len(), 1);

    let thread = orch.store().get("t").await.unwrap();
    assert!(thread.turns.iter().all(|t| t.role != Role::Agent));
    assert!(thread.current_agent.is_none());
}

#[tokio::test]
async fn unregistered_label_leaves_thread_unchanged() {
    let provider = ScriptedProvider::responses(vec![
        decision("support_agent"),
        GenerationResponse::text("hello"),
        decision("billing_agent"),
    ]);
    let orch = orchestrator(&provider, RouterConfig::default());
    orch.handle_turn("t", "hi").await.unwrap();
    let before = orch.store().get("t").await.unwrap();

    let err = orch
        .handle_turn("t", "where is my invoice")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RouterError::RoutingProtocolViolation { ref label, .. } if label == "billing_agent"
    ));
    assert_eq!(orch.store().get("t").await.unwrap(), before);
}

#[tokio::test]
async fn network_error_in_agent_yields_fallback() {
    let provider = ScriptedProvider::new(vec![
        Ok(decision("research_agent")),
        Err(GenerationError::new(ServiceErrorKind::Network, "connection reset")),
    ]);
    let orch = orchestrator(&provider, RouterConfig::default());

    let outcome = orch.handle_turn("t", "research AI trends").await.unwrap();
    let registry = default_registry();
    let expected = registry.lookup("research_agent").unwrap().fallback_text();
    assert_eq!(outcome.replies[0].content, expected);
    assert!(matches!(
        outcome.fallbacks.as_slice(),
        [RouterError::GenerationService {
            kind: ServiceErrorKind::Network,
            ..
        }]
    ));

    let thread = orch.store().get("t").await.unwrap();
    assert_eq!(thread.turns.last().unwrap().content, expected);
    assert_eq!(thread.current_agent.as_deref(), Some("research_agent"));
}

#[tokio::test]
async fn slow_agent_call_times_out_into_fallback() {
    let service = boxed(service_fn(|req: GenerationRequest| async move {
        if req.output_schema.is_some() {
            return Ok::<_, BoxError>(decision("manager_agent"));
        }
        sleep(Duration::from_millis(500)).await;
        Ok(GenerationResponse::text("too late"))
    }));
    let config = RouterConfig {
        request_timeout: Duration::from_millis(20),
        ..RouterConfig::default()
    };
    let orch = Orchestrator::from_config(config, service, Arc::new(default_registry())).unwrap();

    let outcome = orch.handle_turn("t", "Escalate this").await.unwrap();
    let expected = default_registry()
        .lookup("manager_agent")
        .unwrap()
        .fallback_text();
    assert_eq!(outcome.replies.len(), 1);
    assert_eq!(outcome.replies[0].content, expected);
    assert!(matches!(
        outcome.fallbacks.as_slice(),
        [RouterError::GenerationService {
            kind: ServiceErrorKind::Timeout,
            ..
        }]
    ));

    let thread = orch.store().get("t").await.unwrap();
    assert_eq!(thread.turns.last().unwrap().content, expected);
    assert_eq!(thread.current_agent.as_deref(), Some("manager_agent"));
}

#[tokio::test]
async fn same_input_same_state_same_target() {
    let run = || async {
        let provider = ScriptedProvider::responses(vec![
            decision("manager_agent"),
            GenerationResponse::text("escalated"),
        ]);
        let orch = orchestrator(&provider, RouterConfig::default());
        let outcome = orch
            .handle_turn("t", "Escalate this to manager")
            .await
            .unwrap();
        (outcome.current_agent, provider.requests()[0].clone())
    };
    let (first_target, first_request) = run().await;
    let (second_target, second_request) = run().await;
    assert_eq!(first_target, second_target);
    assert_eq!(first_request, second_request);
}

#[tokio::test]
async fn transition_ceiling_is_enforced() {
    let ceiling = 3;
    let mut script = Vec::new();
    for _ in 0..ceiling + 1 {
        script.push(decision("support_agent"));
        script.push(GenerationResponse::text("again"));
    }
    let provider = ScriptedProvider::responses(script);
    let config = RouterConfig {
        max_transitions: ceiling,
        reroute_after_reply: true,
        ..RouterConfig::default()
    };
    let orch = orchestrator(&provider, config);

    let err = orch.handle_turn("t", "loop forever").await.unwrap_err();
    assert!(matches!(err, RouterError::RecursionLimitExceeded { limit } if limit == ceiling));

    // ceiling agent calls plus ceiling + 1 routing calls; the extra agent call never happens
    assert_eq!(provider.requests().len(), 2 * ceiling + 1);
    assert!(orch.store().get("t").await.unwrap().turns.is_empty());
}

#[tokio::test]
async fn tool_handoff_first_transfer_wins() {
    let provider = ScriptedProvider::responses(vec![
        GenerationResponse::invoking(&[
            "transfer_to_research_agent",
            "transfer_to_manager_agent",
        ]),
        GenerationResponse::text("research output"),
    ]);
    let orch = orchestrator(
        &provider,
        RouterConfig::for_strategy(RoutingStrategy::ToolHandoff),
    );

    let outcome = orch
        .handle_turn("t", "research then escalate")
        .await
        .unwrap();
    assert_eq!(outcome.current_agent.as_deref(), Some("research_agent"));
    assert_eq!(outcome.degraded.len(), 1);

    let thread = orch.store().get("t").await.unwrap();
    assert_eq!(
        thread.turns[1].content,
        "Successfully transferred to research_agent"
    );
}

/// Routes everything to support and counts overlapping calls.
fn slow_service(in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> GenerationSvc {
    boxed(service_fn(move |req: GenerationRequest| {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            let resp = if req.output_schema.is_some() {
                decision("support_agent")
            } else {
                GenerationResponse::text("ok")
            };
            Ok::<_, BoxError>(resp)
        }
    }))
}

#[tokio::test]
async fn distinct_threads_run_concurrently() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let orch = Orchestrator::from_config(
        RouterConfig::default(),
        slow_service(in_flight, peak.clone()),
        Arc::new(default_registry()),
    )
    .unwrap();

    let turns = (0..4).map(|i| {
        let orch = &orch;
        async move { orch.handle_turn(&format!("thread-{}", i), "hello").await }
    });
    for outcome in futures::future::join_all(turns).await {
        assert_eq!(outcome.unwrap().transitions, 1);
    }

    assert!(peak.load(Ordering::SeqCst) > 1);
    assert_eq!(orch.store().threads().await.unwrap().len(), 4);
}

#[tokio::test]
async fn same_thread_turns_are_serialized() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let orch = Orchestrator::from_config(
        RouterConfig::default(),
        slow_service(in_flight, peak.clone()),
        Arc::new(default_registry()),
    )
    .unwrap();

    let turns = (0..3).map(|i| {
        let orch = &orch;
        async move { orch.handle_turn("shared", &format!("message {}", i)).await }
    });
    for outcome in futures::future::join_all(turns).await {
        outcome.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let thread = orch.store().get("shared").await.unwrap();
    assert_eq!(thread.turns.len(), 6);
    for pair in thread.turns.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Agent);
    }
}

#[tokio::test]
async fn router_handled_reply_is_not_an_agent_target() {
    let provider =
        ScriptedProvider::responses(vec![GenerationResponse::text("Which account do you mean?")]);
    let orch = orchestrator(
        &provider,
        RouterConfig::for_strategy(RoutingStrategy::ToolHandoff),
    );
    let outcome = orch.handle_turn("t", "help").await.unwrap();
    assert_eq!(outcome.final_state, TurnState::Routing);
    assert_eq!(outcome.replies[0].content, "Which account do you mean?");
    assert!(outcome.replies[0].source_agent.is_none());
    assert!(outcome.current_agent.is_none());
}
