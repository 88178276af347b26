//! Binary quality graders and their typed verdicts.
//!
//! Each grader asks the small model for `{"Score": 0|1}`. Anything else,
//! including a score outside {0, 1}, is a classification failure rather
//! than a guessed verdict.

use crate::reasoner::Reasoner;
use crate::state::format_documents;
use crate::stream::CallTag;
use serde::Deserialize;
use taxbot_core::{AppError, AppResult};
use taxbot_knowledge::Document;
use taxbot_prompt::vars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    Relevant,
    Irrelevant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grounding {
    Grounded,
    Ungrounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Helpfulness {
    Helpful,
    Unhelpful,
}

#[derive(Debug, Deserialize)]
struct BinaryScore {
    #[serde(rename = "Score")]
    score: i64,
}

fn score_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "Score": {"type": "integer", "enum": [0, 1]}
        },
        "required": ["Score"],
        "additionalProperties": false
    })
}

async fn binary_score(
    reasoner: &Reasoner,
    prompt_id: &str,
    variables: &taxbot_prompt::PromptVars,
) -> AppResult<bool> {
    let parsed: BinaryScore = reasoner
        .classify(prompt_id, variables, "binary_score", score_schema(), CallTag::Grader)
        .await?;

    match parsed.score {
        1 => Ok(true),
        0 => Ok(false),
        other => Err(AppError::Classification(format!(
            "{} returned score {} outside {{0, 1}}",
            prompt_id, other
        ))),
    }
}

/// Are the retrieved documents relevant to the working query?
pub async fn grade_relevance(
    reasoner: &Reasoner,
    query: &str,
    documents: &[Document],
) -> AppResult<Relevance> {
    let docs = format_documents(documents);
    let relevant = binary_score(
        reasoner,
        "grade.relevance",
        &vars([("question", query), ("documents", docs.as_str())]),
    )
    .await?;

    Ok(if relevant {
        Relevance::Relevant
    } else {
        Relevance::Irrelevant
    })
}

/// Is the answer supported by the documents?
pub async fn grade_hallucination(
    reasoner: &Reasoner,
    answer: &str,
    documents: &[Document],
) -> AppResult<Grounding> {
    let docs = format_documents(documents);
    let grounded = binary_score(
        reasoner,
        "grade.hallucination",
        &vars([("documents", docs.as_str()), ("answer", answer)]),
    )
    .await?;

    Ok(if grounded {
        Grounding::Grounded
    } else {
        Grounding::Ungrounded
    })
}

/// Does the answer address the user's question?
pub async fn grade_helpfulness(
    reasoner: &Reasoner,
    question: &str,
    answer: &str,
) -> AppResult<Helpfulness> {
    let helpful = binary_score(
        reasoner,
        "grade.helpfulness",
        &vars([("question", question), ("answer", answer)]),
    )
    .await?;

    Ok(if helpful {
        Helpfulness::Helpful
    } else {
        Helpfulness::Unhelpful
    })
}
