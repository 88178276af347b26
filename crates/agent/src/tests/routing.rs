//! Router, supervisor and turn dispatch.

use super::support::{reasoner_for, statute_docs, ScriptedLlm, StaticRetriever, StaticWebSearch};
use crate::agent::{AgentParts, TaxAgent};
use crate::router::{Route, Router, Supervisor, SupervisorStep};
use crate::stream::Terminal;
use std::sync::Arc;
use taxbot_core::{AppError, GraphSettings};
use taxbot_llm::ChatMessage;

fn routing_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .on_matching("router.classify", "종합부동산세", ["{\"target\": \"real_estate_tax\"}"])
        .on_matching("router.classify", "소득세", ["{\"target\": \"income_tax\"}"])
        .on_matching("router.classify", "날씨", ["{\"target\": \"llm\"}"])
        .on_matching("router.classify", "주식", ["{\"target\": \"stock_tax\"}"])
}

fn agent(llm: Arc<ScriptedLlm>) -> TaxAgent {
    TaxAgent::new(AgentParts {
        reasoner: reasoner_for(llm),
        income_tax: Arc::new(StaticRetriever::new(statute_docs())),
        real_estate_tax: Arc::new(StaticRetriever::new(statute_docs())),
        web: Arc::new(StaticWebSearch::empty()),
        settings: GraphSettings {
            multi_query: false,
            ..Default::default()
        },
        web_max_results: 3,
    })
}

#[tokio::test]
async fn test_router_maps_every_question_into_the_closed_set() {
    let router = Router::new(reasoner_for(Arc::new(routing_llm())));

    assert_eq!(router.route("오늘 날씨 어때?").await.unwrap(), Route::GeneralChat);
    assert_eq!(router.route("소득세 계산 방법 알려줘").await.unwrap(), Route::IncomeTax);
    assert_eq!(router.route("종합부동산세 납부 기한").await.unwrap(), Route::RealEstateTax);
    // A label outside the set is general chat, not an error.
    assert_eq!(router.route("주식 양도세는?").await.unwrap(), Route::GeneralChat);
}

#[tokio::test]
async fn test_router_rejects_non_conformant_output() {
    let llm = Arc::new(ScriptedLlm::new().on("router.classify", ["income_tax"]));
    let err = Router::new(reasoner_for(llm)).route("소득세").await.unwrap_err();
    assert!(matches!(err, AppError::Classification(_)));
}

#[tokio::test]
async fn test_supervisor_stops_on_assistant_message_without_calls() {
    let llm = Arc::new(routing_llm());
    let supervisor = Supervisor::new(Router::new(reasoner_for(llm.clone())));

    let answered = vec![
        ChatMessage::user("소득세 계산 방법 알려줘"),
        ChatMessage::assistant("과세표준에 세율을 곱합니다."),
    ];
    assert_eq!(supervisor.next(&answered).await.unwrap(), SupervisorStep::Done);
    assert_eq!(supervisor.next(&[]).await.unwrap(), SupervisorStep::Done);
    assert!(llm.requests().is_empty());

    let pending = vec![ChatMessage::user("종합부동산세 납부 기한")];
    assert_eq!(
        supervisor.next(&pending).await.unwrap(),
        SupervisorStep::Dispatch(Route::RealEstateTax)
    );
}

#[tokio::test]
async fn test_router_sees_question_not_history() {
    let llm = Arc::new(routing_llm().on("chat.general", ["맑아요"]));
    let history = vec![
        ChatMessage::user("소득세 계산 방법 알려줘"),
        ChatMessage::assistant("과세표준에 세율을 곱합니다."),
    ];

    let outcome = agent(llm.clone())
        .answer("오늘 날씨 어때?", &history)
        .await
        .unwrap();

    assert_eq!(outcome.route, Route::GeneralChat);
    let route_request = &llm.requests()[0];
    assert_eq!(route_request.prompt, "오늘 날씨 어때?");
    assert!(route_request.messages.is_empty());
}

#[tokio::test]
async fn test_general_turn_dispatches_exactly_once() {
    let llm = Arc::new(routing_llm().on("chat.general", ["맑고 화창합니다."]));

    let outcome = agent(llm.clone()).answer("오늘 날씨 어때?", &[]).await.unwrap();

    assert_eq!(outcome.route, Route::GeneralChat);
    assert_eq!(outcome.answer, "맑고 화창합니다.");
    assert_eq!(outcome.terminal, Terminal::Done);
    assert_eq!(llm.labels(), vec!["router.classify", "chat.general"]);
}

#[tokio::test]
async fn test_income_tax_turn_reports_fallback() {
    let llm = Arc::new(
        routing_llm()
            .on("grade.relevance", ["{\"Score\": 1}"])
            .on("rag.generate", ["답변"])
            .on("grade.hallucination", ["{\"Score\": 0}"])
            .on("search.query", ["검색어"]),
    );

    let outcome = agent(llm.clone())
        .answer("소득세 계산 방법 알려줘", &[])
        .await
        .unwrap();

    assert_eq!(outcome.route, Route::IncomeTax);
    assert_eq!(outcome.terminal, Terminal::Fallback);
    assert_eq!(outcome.retry_count, 3);
    assert_eq!(outcome.answer, GraphSettings::default().fallback_answer);
    assert_eq!(llm.count("router.classify"), 1);
}

#[tokio::test]
async fn test_classification_failure_dispatches_no_worker() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .on("router.classify", ["not json"])
            .on("chat.general", ["unused"]),
    );

    let err = agent(llm.clone()).answer("안녕", &[]).await.unwrap_err();

    assert!(matches!(err, AppError::Classification(_)));
    assert_eq!(llm.count("chat.general"), 0);
}

#[tokio::test]
async fn test_fixed_route_skips_classification() {
    let llm = Arc::new(ScriptedLlm::new().on("chat.general", ["안녕하세요"]));

    let outcome = agent(llm.clone())
        .answer_as(Route::GeneralChat, "안녕", &[])
        .await
        .unwrap();

    assert_eq!(outcome.answer, "안녕하세요");
    assert_eq!(llm.labels(), vec!["chat.general"]);
}
