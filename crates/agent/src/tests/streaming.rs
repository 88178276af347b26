//! Token streaming through the agent.

use super::support::{reasoner_for, statute_docs, ScriptedLlm, StaticRetriever, StaticWebSearch};
use crate::agent::{AgentParts, TaxAgent};
use crate::router::Route;
use crate::stream::{StreamEvent, Terminal};
use std::sync::Arc;
use std::time::Duration;
use taxbot_core::GraphSettings;
use taxbot_knowledge::Retriever;
use tokio::sync::mpsc;

fn agent(llm: Arc<ScriptedLlm>, retriever: Arc<dyn Retriever>) -> TaxAgent {
    TaxAgent::new(AgentParts {
        reasoner: reasoner_for(llm),
        income_tax: retriever.clone(),
        real_estate_tax: retriever,
        web: Arc::new(StaticWebSearch::empty()),
        settings: GraphSettings {
            multi_query: false,
            ..Default::default()
        },
        web_max_results: 3,
    })
}

async fn collect(mut rx: mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn tokens(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn grounded_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .on("router.classify", ["{\"target\": \"income_tax\"}"])
        .on("grade.relevance", ["{\"Score\": 1}"])
        .on("rag.generate", ["과세표준 1,400만원 이하 구간의 세율은 6% 입니다."])
        .on("grade.hallucination", ["{\"Score\": 1}"])
        .on("grade.helpfulness", ["{\"Score\": 1}"])
}

#[tokio::test]
async fn test_stream_emits_only_final_answer_tokens() {
    let llm = Arc::new(grounded_llm());
    let retriever = Arc::new(StaticRetriever::new(statute_docs()));

    let events = collect(agent(llm, retriever).answer_stream(
        "소득세율 알려줘".to_string(),
        Vec::new(),
        None,
    ))
    .await;

    let streamed = tokens(&events);
    assert_eq!(streamed, "과세표준 1,400만원 이하 구간의 세율은 6% 입니다.");
    assert!(!streamed.contains("Score"));
    assert!(!streamed.contains("target"));

    match events.last() {
        Some(StreamEvent::Done {
            route,
            answer,
            retry_count,
            terminal,
        }) => {
            assert_eq!(*route, Route::IncomeTax);
            assert_eq!(answer, &streamed);
            assert_eq!(*retry_count, 0);
            assert_eq!(*terminal, Terminal::Done);
        }
        other => panic!("expected Done, got {:?}", other),
    }
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Done { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_stream_with_fixed_route_skips_router() {
    let llm = Arc::new(ScriptedLlm::new().on("chat.general", ["안녕하세요 반갑습니다"]));
    let retriever = Arc::new(StaticRetriever::new(statute_docs()));

    let events = collect(agent(llm.clone(), retriever).answer_stream(
        "안녕".to_string(),
        Vec::new(),
        Some(Route::GeneralChat),
    ))
    .await;

    assert_eq!(tokens(&events), "안녕하세요 반갑습니다");
    assert_eq!(llm.labels(), vec!["chat.general"]);
}

#[tokio::test]
async fn test_stream_ends_with_error_on_failure() {
    let llm = Arc::new(grounded_llm());
    let retriever = Arc::new(StaticRetriever::failing());

    let events = collect(agent(llm, retriever).answer_stream(
        "소득세율 알려줘".to_string(),
        Vec::new(),
        None,
    ))
    .await;

    match events.last() {
        Some(StreamEvent::Error { message }) => {
            assert!(message.contains("vector store unavailable"));
        }
        other => panic!("expected Error, got {:?}", other),
    }
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
}

#[tokio::test]
async fn test_dropping_receiver_stops_remaining_calls() {
    let llm = Arc::new(grounded_llm().with_delay(Duration::from_millis(200)));
    let retriever = Arc::new(StaticRetriever::new(statute_docs()));

    let rx = agent(llm.clone(), retriever).answer_stream(
        "소득세율 알려줘".to_string(),
        Vec::new(),
        Some(Route::IncomeTax),
    );
    // The relevance grade has completed; generation is still waiting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    drop(rx);
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(llm.labels(), vec!["grade.relevance"]);
}

#[tokio::test]
async fn test_done_answer_is_final_draft_after_rejected_one() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .on("grade.relevance", ["{\"Score\": 1}"])
            .on("rag.generate", ["근거 없는 초안", "세율은 6% 입니다."])
            .on("grade.hallucination", ["{\"Score\": 0}", "{\"Score\": 1}"])
            .on("grade.helpfulness", ["{\"Score\": 1}"])
            .on("search.query", ["종합소득세 세율"]),
    );
    let retriever = Arc::new(StaticRetriever::new(statute_docs()));

    let events = collect(agent(llm, retriever).answer_stream(
        "소득세율 알려줘".to_string(),
        Vec::new(),
        Some(Route::IncomeTax),
    ))
    .await;

    // Tokens of the rejected draft were already sent before grading.
    assert_eq!(tokens(&events), "근거 없는 초안세율은 6% 입니다.");
    match events.last() {
        Some(StreamEvent::Done {
            answer,
            retry_count,
            ..
        }) => {
            assert_eq!(answer, "세율은 6% 입니다.");
            assert_eq!(*retry_count, 1);
        }
        other => panic!("expected Done, got {:?}", other),
    }
}
