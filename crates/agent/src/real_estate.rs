//! Comprehensive real estate tax pipeline.
//!
//! Three independent branches gather the tax-base formula, the deduction
//! amount and the current fair market value ratio. They run concurrently and
//! join before the tax base is computed; the tax amount is then computed
//! from the tax base and the rate table.

use crate::reasoner::{ModelTier, Reasoner};
use crate::state::format_documents;
use crate::stream::CallTag;
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use taxbot_core::AppResult;
use taxbot_knowledge::{Retriever, WebSearch};
use taxbot_prompt::vars;
use tracing::Instrument;

const TAX_BASE_QUESTION: &str =
    "주택에 대한 종합부동산세 계산시 과세표준을 계산하는 방법을 수식으로 표현해서 알려주세요";

const DEDUCTION_QUESTION: &str = "주택에 대한 종합부동산세 계산시 공제금액을 알려주세요";

/// Results of all three fan-out branches.
///
/// Only [`RealEstatePipeline::gather`] builds this, and only after every
/// branch has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxBaseInputs {
    equation: String,
    deduction: String,
    market_ratio: String,
}

impl TaxBaseInputs {
    pub fn equation(&self) -> &str {
        &self.equation
    }

    pub fn deduction(&self) -> &str {
        &self.deduction
    }

    pub fn market_ratio(&self) -> &str {
        &self.market_ratio
    }
}

#[derive(Debug, Clone)]
pub struct RealEstateOutcome {
    pub inputs: TaxBaseInputs,
    pub tax_base: String,
    pub answer: String,
}

#[derive(Clone)]
pub struct RealEstatePipeline {
    reasoner: Reasoner,
    retriever: Arc<dyn Retriever>,
    web: Arc<dyn WebSearch>,
    top_k: usize,
    web_max_results: usize,
    today: Option<NaiveDate>,
}

impl RealEstatePipeline {
    pub fn new(reasoner: Reasoner, retriever: Arc<dyn Retriever>, web: Arc<dyn WebSearch>) -> Self {
        Self {
            reasoner,
            retriever,
            web,
            top_k: 3,
            web_max_results: 5,
            today: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_web_max_results(mut self, max_results: usize) -> Self {
        self.web_max_results = max_results;
        self
    }

    /// Fix the date used in the market ratio query.
    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_reasoner(mut self, reasoner: Reasoner) -> Self {
        self.reasoner = reasoner;
        self
    }

    pub fn reasoner(&self) -> &Reasoner {
        &self.reasoner
    }

    /// Run the whole pipeline for the user's holdings description.
    pub async fn run(&self, query: &str) -> AppResult<RealEstateOutcome> {
        let inputs = self.gather().await?;
        let tax_base = self
            .calculate_tax_base(&inputs, query)
            .instrument(tracing::info_span!("node", node = "calculate_tax_base"))
            .await?;
        let answer = self
            .calculate_tax_amount(&tax_base, query)
            .instrument(tracing::info_span!("node", node = "calculate_tax_amount"))
            .await?;

        Ok(RealEstateOutcome {
            inputs,
            tax_base,
            answer,
        })
    }

    /// Run the three branches concurrently. Fails as soon as any branch fails.
    pub async fn gather(&self) -> AppResult<TaxBaseInputs> {
        let (equation, deduction, market_ratio) = tokio::try_join!(
            self.tax_base_equation()
                .instrument(tracing::info_span!("node", node = "tax_base_equation")),
            self.tax_deduction()
                .instrument(tracing::info_span!("node", node = "tax_deduction")),
            self.market_ratio()
                .instrument(tracing::info_span!("node", node = "market_ratio")),
        )?;

        tracing::info!("Real estate branches joined");
        Ok(TaxBaseInputs {
            equation,
            deduction,
            market_ratio,
        })
    }

    /// Answer `question` from the collection with the short RAG prompt.
    async fn answer_from_documents(&self, question: &str) -> AppResult<String> {
        let documents = self.retriever.search(question, self.top_k).await?;
        let context = format_documents(&documents);
        self.reasoner
            .generate(
                "real_estate.rag",
                &vars([("question", question), ("context", context.as_str())]),
                &[],
                ModelTier::Main,
                CallTag::Internal,
            )
            .await
    }

    async fn tax_base_equation(&self) -> AppResult<String> {
        let information = self.answer_from_documents(TAX_BASE_QUESTION).await?;
        self.reasoner
            .generate(
                "real_estate.tax_base_equation",
                &vars([("information", information.as_str())]),
                &[],
                ModelTier::Main,
                CallTag::Internal,
            )
            .await
    }

    async fn tax_deduction(&self) -> AppResult<String> {
        self.answer_from_documents(DEDUCTION_QUESTION).await
    }

    async fn market_ratio(&self) -> AppResult<String> {
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let query = format!(
            "오늘 날짜:({})에 해당하는 주택 공시가격 공정시장가액비율은 몇 %인가요?",
            today
        );

        let documents = self.web.search(&query, self.web_max_results).await?;
        let context = format_documents(&documents);
        self.reasoner
            .generate(
                "real_estate.market_ratio",
                &vars([("context", context.as_str()), ("query", query.as_str())]),
                &[],
                ModelTier::Main,
                CallTag::Internal,
            )
            .await
    }

    async fn calculate_tax_base(&self, inputs: &TaxBaseInputs, query: &str) -> AppResult<String> {
        self.reasoner
            .generate(
                "real_estate.tax_base",
                &vars([
                    ("equation", inputs.equation()),
                    ("deduction", inputs.deduction()),
                    ("market_ratio", inputs.market_ratio()),
                    ("query", query),
                ]),
                &[],
                ModelTier::Main,
                CallTag::Internal,
            )
            .await
    }

    async fn calculate_tax_amount(&self, tax_base: &str, query: &str) -> AppResult<String> {
        let documents = self.retriever.search(query, self.top_k).await?;
        let context = format_documents(&documents);
        self.reasoner
            .generate(
                "real_estate.tax_amount",
                &vars([
                    ("context", context.as_str()),
                    ("tax_base", tax_base),
                    ("query", query),
                ]),
                &[],
                ModelTier::Main,
                CallTag::FinalAnswer,
            )
            .await
    }
}
