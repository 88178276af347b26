//! Node bodies. Each reads what it needs from the state and writes only
//! its own output field.

use super::graph::RagGraph;
use crate::reasoner::ModelTier;
use crate::state::{format_documents, ConversationState};
use crate::stream::CallTag;
use std::collections::HashSet;
use taxbot_core::AppResult;
use taxbot_knowledge::Document;
use taxbot_prompt::vars;

/// Alternative phrasings requested for multi-query retrieval.
const QUERY_VARIANTS: usize = 3;

/// Colloquial-to-statutory term mappings given to the rewriter.
const TERM_DICTIONARY: &[&str] = &["사람과 관련된 표현 -> 거주자"];

impl RagGraph {
    /// Rewrite the working query into statute vocabulary.
    pub(super) async fn rewrite(&self, state: &mut ConversationState) -> AppResult<()> {
        let dictionary = TERM_DICTIONARY.join(", ");
        let rewritten = self
            .reasoner
            .generate(
                "income_tax.rewrite",
                &vars([("dictionary", dictionary.as_str()), ("query", state.query())]),
                &[],
                ModelTier::Main,
                CallTag::Rewrite,
            )
            .await?;

        if rewritten.is_empty() {
            tracing::debug!("Rewriter returned nothing; keeping query");
        } else {
            tracing::info!(from = %state.query(), to = %rewritten, "Query rewritten");
            state.set_query(rewritten);
        }
        Ok(())
    }

    /// Replace the context with the top-k documents for the working query.
    ///
    /// With multi-query on, only the generated phrasings are searched; the
    /// working query is used when the expansion yields none.
    pub(super) async fn retrieve(&self, state: &mut ConversationState) -> AppResult<()> {
        let mut queries = Vec::new();
        if self.settings.multi_query {
            let count = QUERY_VARIANTS.to_string();
            let expansion = self
                .reasoner
                .generate(
                    "income_tax.multi_query",
                    &vars([
                        ("count", count.as_str()),
                        ("question", state.query()),
                    ]),
                    &[],
                    ModelTier::Small,
                    CallTag::Internal,
                )
                .await?;
            for variant in parse_query_variants(&expansion, QUERY_VARIANTS) {
                if !queries.contains(&variant) {
                    queries.push(variant);
                }
            }
        }
        if queries.is_empty() {
            queries.push(state.query().to_string());
        }

        let k = self.settings.top_k;
        let searches = queries.iter().map(|q| self.retriever.search(q, k));
        let results = futures::future::try_join_all(searches).await?;

        let documents = merge_unique(results);
        tracing::info!(
            retriever = self.retriever.name(),
            queries = queries.len(),
            documents = documents.len(),
            "Retrieved documents"
        );
        state.replace_context(documents);
        Ok(())
    }

    /// Replace the context with web results for a search-optimized query.
    pub(super) async fn web_search(&self, state: &mut ConversationState) -> AppResult<()> {
        let search_query = self
            .reasoner
            .generate(
                "search.query",
                &vars([("query", state.query())]),
                &[],
                ModelTier::Small,
                CallTag::Rewrite,
            )
            .await?;
        let search_query = if search_query.is_empty() {
            state.query().to_string()
        } else {
            search_query
        };

        let documents = self.web.search(&search_query, self.web_max_results).await?;
        tracing::info!(query = %search_query, documents = documents.len(), "Web search complete");
        state.replace_context(documents);
        Ok(())
    }

    /// Answer the original question from the current context.
    pub(super) async fn generate(&self, state: &mut ConversationState) -> AppResult<()> {
        let context = format_documents(state.context());
        let answer = self
            .reasoner
            .generate(
                "rag.generate",
                &vars([("context", context.as_str()), ("question", state.question())]),
                state.chat_history(),
                ModelTier::Main,
                CallTag::FinalAnswer,
            )
            .await?;

        tracing::debug!(chars = answer.chars().count(), "Answer generated");
        state.set_answer(answer);
        Ok(())
    }
}

/// Split a multi-query completion into at most `limit` queries, dropping
/// list markers and blank lines.
fn parse_query_variants(text: &str, limit: usize) -> Vec<String> {
    text.lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// "1. foo", "2) foo", "- foo" and "* foo" all become "foo".
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let unnumbered = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if unnumbered.len() < line.len() {
        if let Some(rest) = unnumbered
            .strip_prefix('.')
            .or_else(|| unnumbered.strip_prefix(')'))
        {
            return rest.trim();
        }
    }
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line)
        .trim()
}

/// Flatten result lists, keeping the first occurrence of each document.
fn merge_unique(results: Vec<Vec<Document>>) -> Vec<Document> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .flatten()
        .filter(|doc| seen.insert(doc.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_variants() {
        let text = "1. 거주자의 종합소득세율\n\n2) 소득세 과세표준 구간\n- 2024년 소득세법 제55조\n4. extra";
        assert_eq!(
            parse_query_variants(text, 3),
            vec!["거주자의 종합소득세율", "소득세 과세표준 구간", "2024년 소득세법 제55조"]
        );
    }

    #[test]
    fn test_merge_unique_keeps_first_seen_order() {
        let a = Document::new("제55조", "law.md");
        let b = Document::new("제47조", "law.md");
        let c = Document::new("제55조", "other.md");

        let merged = merge_unique(vec![
            vec![a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ]);

        assert_eq!(merged, vec![a, b, c]);
    }
}
