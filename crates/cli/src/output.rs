//! Terminal rendering of answers.

use std::io::Write;
use taxbot_agent::{StreamEvent, Terminal, TurnOutcome};
use taxbot_core::{AppError, AppResult};
use tokio::sync::mpsc;

/// JSON body printed by `--json`.
pub fn outcome_json(outcome: &TurnOutcome) -> serde_json::Value {
    serde_json::json!({
        "route": outcome.route,
        "answer": outcome.answer,
        "retryCount": outcome.retry_count,
        "terminal": outcome.terminal,
    })
}

pub fn print_json(value: &serde_json::Value) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Serialization(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

pub fn print_outcome(outcome: &TurnOutcome) {
    println!("{}", outcome.answer);
    log_outcome(outcome);
}

fn log_outcome(outcome: &TurnOutcome) {
    if outcome.terminal == Terminal::Fallback {
        tracing::warn!(retry_count = outcome.retry_count, "Answer budget exhausted");
    }
    tracing::debug!(
        route = %outcome.route,
        retry_count = outcome.retry_count,
        terminal = ?outcome.terminal,
        "Turn finished"
    );
}

/// Print tokens as they arrive and return the turn's outcome.
///
/// Drafts that the graders rejected may already have been printed; when the
/// final answer differs from what was streamed it is printed again in full.
pub async fn render_stream(mut events: mpsc::UnboundedReceiver<StreamEvent>) -> AppResult<TurnOutcome> {
    let mut streamed = String::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Token { content } => {
                streamed.push_str(&content);
                print!("{}", content);
                stdout.flush().ok();
            }
            StreamEvent::Done {
                route,
                answer,
                retry_count,
                terminal,
            } => {
                if !streamed.is_empty() {
                    println!();
                }
                if streamed.trim() != answer {
                    if !streamed.is_empty() {
                        println!();
                    }
                    println!("{}", answer);
                }
                let outcome = TurnOutcome {
                    route,
                    answer,
                    retry_count,
                    terminal,
                };
                log_outcome(&outcome);
                return Ok(outcome);
            }
            StreamEvent::Error { message } => {
                if !streamed.is_empty() {
                    println!();
                }
                return Err(AppError::Other(message));
            }
        }
    }

    Err(AppError::Other(
        "Answer stream ended without a result".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxbot_agent::Route;

    #[tokio::test]
    async fn test_render_stream_returns_done_outcome() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Token {
            content: "세율은 ".to_string(),
        })
        .unwrap();
        tx.send(StreamEvent::Token {
            content: "6%입니다.".to_string(),
        })
        .unwrap();
        tx.send(StreamEvent::Done {
            route: Route::IncomeTax,
            answer: "세율은 6%입니다.".to_string(),
            retry_count: 1,
            terminal: Terminal::Done,
        })
        .unwrap();

        let outcome = render_stream(rx).await.unwrap();
        assert_eq!(outcome.route, Route::IncomeTax);
        assert_eq!(outcome.retry_count, 1);
        assert_eq!(outcome.answer, "세율은 6%입니다.");
    }

    #[tokio::test]
    async fn test_render_stream_error_event() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Error {
            message: "Retrieval error: index missing".to_string(),
        })
        .unwrap();

        let err = render_stream(rx).await.unwrap_err();
        assert!(err.to_string().contains("index missing"));
    }

    #[tokio::test]
    async fn test_render_stream_closed_without_result() {
        let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
        drop(tx);
        assert!(render_stream(rx).await.is_err());
    }

    #[test]
    fn test_outcome_json_keys() {
        let outcome = TurnOutcome {
            route: Route::GeneralChat,
            answer: "안녕하세요".to_string(),
            retry_count: 0,
            terminal: Terminal::Fallback,
        };
        let json = outcome_json(&outcome);
        assert_eq!(json["route"], "general_chat");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["terminal"], "fallback");
    }
}
