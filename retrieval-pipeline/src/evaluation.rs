//! LLM-judged evaluation of a job's RAG answers and, when available, its fine-tuned model.

use std::collections::BTreeMap;

use common::{
    error::AppError,
    storage::types::finetuned_model::FineTunedModel,
    utils::llm::{ChatMessage, ChatOptions},
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{chat::ChatMode, context::load_job_chunks, RetrievalService};

const BASE_METRICS: [&str; 4] = ["relevancy", "faithfulness", "completeness", "clarity"];
const JUDGE_MAX_TOKENS: u32 = 150;

/// One fixed evaluation question with optional reference answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationQuestion {
    pub question: &'static str,
    pub ground_truth: Option<&'static str>,
    pub oracle: Option<&'static str>,
}

const fn open_question(question: &'static str) -> EvaluationQuestion {
    EvaluationQuestion {
        question,
        ground_truth: None,
        oracle: None,
    }
}

const fn reference_question(question: &'static str, answer: &'static str) -> EvaluationQuestion {
    EvaluationQuestion {
        question,
        ground_truth: Some(answer),
        oracle: Some(answer),
    }
}

pub const EVALUATION_QUESTIONS: [EvaluationQuestion; 7] = [
    open_question("What is the main topic discussed in the document?"),
    open_question("Can you summarize the key points?"),
    open_question("What is the primary argument presented?"),
    reference_question("How many Rs are in strawberry?", "3"),
    reference_question(
        "What is the capital of Atlantis?",
        "There is no capital of Atlantis.",
    ),
    open_question("What are the potential limitations of the discussed approach?"),
    open_question("Based on the document, what future work is suggested?"),
];

pub type TrialMetrics = BTreeMap<String, i64>;
pub type AverageMetrics = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerEvaluation {
    pub average: Option<AverageMetrics>,
    pub individual: Vec<TrialMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionEvaluation {
    pub question: String,
    pub answer: Option<String>,
    pub evaluation: AnswerEvaluation,
    pub ground_truth: Option<String>,
    pub oracle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeEvaluation {
    pub per_question: Vec<QuestionEvaluation>,
    pub overall_average: Option<BTreeMap<String, Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub job_id: String,
    pub evaluation_questions: Vec<EvaluationQuestion>,
    pub rag_evaluation: ModeEvaluation,
    pub finetuned_evaluation: Option<ModeEvaluation>,
}

pub fn build_judge_prompt(
    question: &str,
    answer: &str,
    context: &str,
    ground_truth: Option<&str>,
    oracle: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "Evaluate the following answer based on the question and context. Provide a JSON object with the following keys: 'relevancy', 'faithfulness', 'completeness', and 'clarity'.",
    );
    if ground_truth.is_some() {
        prompt.push_str(
            " Also, compare the answer with the provided ground truth and rate its correctness (1-10).",
        );
    }
    if oracle.is_some() {
        prompt.push_str(
            " Additionally, compare the answer with the oracle answer and rate their agreement (1-10).",
        );
    }
    prompt.push_str(&format!(
        "\n\nQuestion: {question}\nAnswer: {answer}\nContext: {context}\n"
    ));
    if let Some(truth) = ground_truth {
        prompt.push_str(&format!("Ground truth: {truth}\n"));
    }
    if let Some(oracle) = oracle {
        prompt.push_str(&format!("Oracle answer: {oracle}\n"));
    }
    prompt.push_str(
        "\nYour output must be a valid JSON object only. For example: {\"relevancy\": 8, \"faithfulness\": 7, \"completeness\": 6, \"clarity\": 9",
    );
    if ground_truth.is_some() {
        prompt.push_str(", \"correctness\": 8");
    }
    if oracle.is_some() {
        prompt.push_str(", \"oracle_agreement\": 7");
    }
    prompt.push('}');
    prompt
}

/// Slice from the first `{` to the last `}`, or the whole text if there is none.
pub fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end >= start => &text[start..=end],
        _ => text,
    }
}

/// Parses a judge reply, requiring an integer for every expected metric.
pub fn parse_judge_metrics(
    reply: &str,
    ground_truth: bool,
    oracle: bool,
) -> Result<TrialMetrics, AppError> {
    let value: Value = serde_json::from_str(extract_json(reply.trim()))
        .map_err(|err| AppError::LLMParsing(format!("judge reply is not JSON: {err}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| AppError::LLMParsing("judge reply is not a JSON object".into()))?;

    let mut required: Vec<&str> = BASE_METRICS.to_vec();
    if ground_truth {
        required.push("correctness");
    }
    if oracle {
        required.push("oracle_agreement");
    }
    for key in &required {
        if !object.get(*key).is_some_and(Value::is_i64) {
            return Err(AppError::LLMParsing(format!(
                "Metric '{key}' missing or invalid"
            )));
        }
    }

    Ok(object
        .iter()
        .filter_map(|(key, value)| value.as_i64().map(|score| (key.clone(), score)))
        .collect())
}

fn average_trials(trials: &[TrialMetrics], ground_truth: bool, oracle: bool) -> AverageMetrics {
    if trials.is_empty() {
        let mut zeros: AverageMetrics = BASE_METRICS
            .iter()
            .map(|key| ((*key).to_string(), 0.0))
            .collect();
        if ground_truth {
            zeros.insert("correctness".into(), 0.0);
        }
        if oracle {
            zeros.insert("oracle_agreement".into(), 0.0);
        }
        return zeros;
    }

    let mut keys: Vec<&String> = trials.iter().flat_map(|trial| trial.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .map(|key| {
            let total: i64 = trials
                .iter()
                .map(|trial| trial.get(key).copied().unwrap_or(0))
                .sum();
            (key.clone(), total as f64 / trials.len() as f64)
        })
        .collect()
}

/// Mean of every metric over the questions that produced an average.
fn overall_average(details: &[QuestionEvaluation]) -> Option<BTreeMap<String, Option<f64>>> {
    if details.is_empty() {
        return None;
    }
    let mut collected: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for average in details.iter().filter_map(|d| d.evaluation.average.as_ref()) {
        for (key, value) in average {
            collected.entry(key.clone()).or_default().push(*value);
        }
    }
    Some(
        collected
            .into_iter()
            .map(|(key, values)| {
                let mean = (!values.is_empty())
                    .then(|| values.iter().sum::<f64>() / values.len() as f64);
                (key, mean)
            })
            .collect(),
    )
}

impl RetrievalService {
    /// Scores an answer with the judge model over `trials` attempts; failed attempts are skipped.
    pub async fn evaluate_answer(
        &self,
        question: &EvaluationQuestion,
        answer: &str,
        context: &str,
        trials: usize,
    ) -> AnswerEvaluation {
        let prompt = build_judge_prompt(
            question.question,
            answer,
            context,
            question.ground_truth,
            question.oracle,
        );
        let options = ChatOptions {
            temperature: Some(0.0),
            max_tokens: Some(JUDGE_MAX_TOKENS),
        };

        let mut results = Vec::new();
        for trial in 1..=trials {
            let outcome = self
                .llm
                .chat(&self.chat_model, vec![ChatMessage::user(prompt.clone())], options)
                .await
                .and_then(|reply| {
                    debug!(trial, reply = %reply, "judge reply");
                    parse_judge_metrics(
                        &reply,
                        question.ground_truth.is_some(),
                        question.oracle.is_some(),
                    )
                });
            match outcome {
                Ok(metrics) => results.push(metrics),
                Err(err) => warn!(trial, error = %err, "evaluation trial failed"),
            }
        }

        AnswerEvaluation {
            average: Some(average_trials(
                &results,
                question.ground_truth.is_some(),
                question.oracle.is_some(),
            )),
            individual: results,
        }
    }

    async fn evaluate_mode(&self, job_id: &str, mode: ChatMode, context: &str) -> ModeEvaluation {
        let mut per_question = Vec::with_capacity(EVALUATION_QUESTIONS.len());
        for question in &EVALUATION_QUESTIONS {
            let detail = match self.chat_by_job(job_id, question.question, mode).await {
                Ok(answer) => {
                    let evaluation = self.evaluate_answer(question, &answer, context, 1).await;
                    QuestionEvaluation {
                        question: question.question.to_string(),
                        answer: Some(answer),
                        evaluation,
                        ground_truth: question.ground_truth.map(str::to_string),
                        oracle: question.oracle.map(str::to_string),
                    }
                }
                Err(err) => {
                    warn!(
                        job_id = %job_id,
                        mode = %mode,
                        question = question.question,
                        error = %err,
                        "failed to answer evaluation question"
                    );
                    QuestionEvaluation {
                        question: question.question.to_string(),
                        answer: None,
                        evaluation: AnswerEvaluation {
                            average: None,
                            individual: Vec::new(),
                        },
                        ground_truth: question.ground_truth.map(str::to_string),
                        oracle: question.oracle.map(str::to_string),
                    }
                }
            };
            per_question.push(detail);
        }

        let overall_average = overall_average(&per_question);
        ModeEvaluation {
            per_question,
            overall_average,
        }
    }

    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn evaluate_model(&self, job_id: &str) -> Result<EvaluationReport, AppError> {
        let context = load_job_chunks(&self.db, &self.storage, job_id)
            .await?
            .join("\n");

        let rag_evaluation = self.evaluate_mode(job_id, ChatMode::Rag, &context).await;

        let finetuned_evaluation = if FineTunedModel::ready_model_for_job(job_id, &self.db)
            .await?
            .is_some()
        {
            Some(
                self.evaluate_mode(job_id, ChatMode::FineTunedOnly, &context)
                    .await,
            )
        } else {
            info!(job_id = %job_id, "no fine-tuned model; skipping fine-tuned evaluation");
            None
        };

        Ok(EvaluationReport {
            job_id: job_id.to_string(),
            evaluation_questions: EVALUATION_QUESTIONS.to_vec(),
            rag_evaluation,
            finetuned_evaluation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use common::storage::types::document::{ArtifactPaths, Document};

    const GOOD_REPLY: &str = r#"Sure! {"relevancy": 8, "faithfulness": 6, "completeness": 7, "clarity": 9, "correctness": 10, "oracle_agreement": 10} done"#;

    #[test]
    fn judge_prompt_mentions_references_only_when_present() {
        let plain = build_judge_prompt("Q", "A", "C", None, None);
        assert!(!plain.contains("Ground truth"));
        assert!(plain.ends_with("\"clarity\": 9}"));

        let full = build_judge_prompt("Q", "A", "C", Some("3"), Some("3"));
        assert!(full.contains("rate its correctness (1-10)."));
        assert!(full.contains("Ground truth: 3\nOracle answer: 3\n"));
        assert!(full.ends_with(", \"correctness\": 8, \"oracle_agreement\": 7}"));
    }

    #[test]
    fn json_is_cut_from_surrounding_prose() {
        assert_eq!(extract_json("noise {\"a\": 1} tail"), "{\"a\": 1}");
        assert_eq!(extract_json("no braces"), "no braces");
    }

    #[test]
    fn metrics_must_be_integers() {
        let ok = parse_judge_metrics(GOOD_REPLY, true, true).expect("metrics");
        assert_eq!(ok.get("clarity"), Some(&9));

        let fractional = r#"{"relevancy": 8.5, "faithfulness": 6, "completeness": 7, "clarity": 9}"#;
        assert!(parse_judge_metrics(fractional, false, false).is_err());

        let missing_correctness =
            r#"{"relevancy": 8, "faithfulness": 6, "completeness": 7, "clarity": 9}"#;
        assert!(parse_judge_metrics(missing_correctness, true, false).is_err());
    }

    #[test]
    fn no_successful_trials_average_to_zero() {
        let zeros = average_trials(&[], true, false);
        assert_eq!(zeros.len(), 5);
        assert!(zeros.values().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn evaluation_without_context_is_not_available() {
        let harness = Harness::new("unused").await;
        harness
            .db
            .store_item(Document::aggregated("job-e", ArtifactPaths::default()))
            .await
            .expect("store");

        let err = harness
            .service
            .evaluate_model("job-e")
            .await
            .expect_err("no context");
        assert!(matches!(err, AppError::NoRelevantContext(_)));
    }

    #[tokio::test]
    async fn rag_only_report_when_no_model_exists() {
        let harness = Harness::new(GOOD_REPLY).await;
        harness
            .document_with_chunks("job-r", &["the document talks about rust"], true)
            .await;

        let report = harness.service.evaluate_model("job-r").await.expect("report");
        assert!(report.finetuned_evaluation.is_none());
        assert_eq!(report.evaluation_questions.len(), 7);
        assert_eq!(report.rag_evaluation.per_question.len(), 7);

        let overall = report
            .rag_evaluation
            .overall_average
            .expect("overall average");
        assert_eq!(overall.get("clarity"), Some(&Some(9.0)));

        // one answer and one judge call per question
        assert_eq!(harness.llm.calls.lock().await.len(), 14);
        let judge_calls = harness.llm.calls.lock().await;
        assert_eq!(judge_calls[1].2.temperature, Some(0.0));
        assert_eq!(judge_calls[1].2.max_tokens, Some(150));
    }

    #[tokio::test]
    async fn failed_answers_are_recorded_as_null() {
        let harness = Harness::new(GOOD_REPLY).await;
        harness
            .document_with_chunks("job-f", &["context"], true)
            .await;
        harness.llm.push_reply(Err("provider down")).await;

        let report = harness.service.evaluate_model("job-f").await.expect("report");
        let first = &report.rag_evaluation.per_question[0];
        assert!(first.answer.is_none());
        assert!(first.evaluation.average.is_none());
        assert!(report.rag_evaluation.per_question[1].answer.is_some());
    }

    #[tokio::test]
    async fn fine_tuned_model_is_evaluated_too() {
        let harness = Harness::new(GOOD_REPLY).await;
        harness
            .document_with_chunks("job-t", &["context"], true)
            .await;
        let mut attempt = FineTunedModel::new("job-t", "ftjob".into());
        attempt.openai_model_id = Some("ft:job-t".into());
        harness.db.store_item(attempt).await.expect("store");

        let report = harness.service.evaluate_model("job-t").await.expect("report");
        let tuned = report.finetuned_evaluation.expect("fine-tuned evaluation");
        assert_eq!(tuned.per_question.len(), 7);
    }
}
