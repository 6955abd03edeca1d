//! Critic：对执行结果做多维评审
//!
//! 评分交给 LLM，输出按 JSON 解析；缺失的维度取 0.5，缺失的总分按权重公式计算；
//! 完全无法解析时退回中性评审，不让循环因此失败。

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::autonomy::types::Critique;
use crate::core::{truncate_chars, AgentError};
use crate::llm::{parse_json, parse_or_fallback, LlmClient};

pub(crate) const CRITIC_SYSTEM_PROMPT: &str = "You are a rigorous evaluator of research and analysis output. Score honestly against the stated goal and respond with JSON only.";

const RESULT_PREVIEW_CHARS: usize = 2000;

/// 评审模型的原始输出；所有字段可缺省
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CritiqueResponse {
    completeness_score: Option<f64>,
    evidence_strength_score: Option<f64>,
    coherence_score: Option<f64>,
    actionability_score: Option<f64>,
    overall_score: Option<f64>,
    weaknesses: Vec<String>,
    missing_components: Vec<String>,
    improvement_suggestions: Vec<String>,
    should_iterate: Option<bool>,
    confidence: Option<f64>,
}

impl CritiqueResponse {
    fn into_critique(self) -> Critique {
        let score = |s: Option<f64>| s.unwrap_or(0.5).clamp(0.0, 1.0);
        let completeness = score(self.completeness_score);
        let evidence = score(self.evidence_strength_score);
        let coherence = score(self.coherence_score);
        let actionability = score(self.actionability_score);
        let overall = self
            .overall_score
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or_else(|| Critique::weighted_overall(completeness, evidence, coherence, actionability));

        Critique {
            completeness_score: completeness,
            evidence_strength_score: evidence,
            coherence_score: coherence,
            actionability_score: actionability,
            overall_score: overall,
            weaknesses: self.weaknesses,
            missing_components: self.missing_components,
            improvement_suggestions: self.improvement_suggestions,
            should_iterate: self.should_iterate.unwrap_or(true),
            confidence: self.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
            timestamp: Utc::now(),
        }
    }
}

/// 解析评审输出；JSON 不可用时返回中性评审
pub fn parse_critique(text: &str) -> Critique {
    parse_or_fallback(
        text,
        |t| parse_json::<CritiqueResponse>(t).map(CritiqueResponse::into_critique),
        |_| Critique::neutral_fallback(),
    )
}

pub struct Critic {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
}

impl Critic {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    fn build_prompt(result: &Value, goal: &str, context: Option<&Map<String, Value>>) -> String {
        let result_text = match result {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        };
        let context_block = match context {
            Some(ctx) if !ctx.is_empty() => format!(
                "\nContext:\n{}\n",
                serde_json::to_string_pretty(ctx).unwrap_or_default()
            ),
            _ => String::new(),
        };

        format!(
            r#"Evaluate the following result against the goal.

Goal: {goal}
{context_block}
Result:
{result}

Score each dimension from 0.0 to 1.0:
- completeness_score: does the result fully address the goal?
- evidence_strength_score: are claims supported by data or sources?
- coherence_score: is the reasoning consistent and well organised?
- actionability_score: can someone act on it directly?

Respond with a JSON object:
{{
    "completeness_score": 0.0,
    "evidence_strength_score": 0.0,
    "coherence_score": 0.0,
    "actionability_score": 0.0,
    "overall_score": 0.0,
    "weaknesses": ["..."],
    "missing_components": ["..."],
    "improvement_suggestions": ["..."],
    "should_iterate": true,
    "confidence": 0.0
}}"#,
            result = truncate_chars(&result_text, RESULT_PREVIEW_CHARS),
        )
    }

    /// LLM 调用失败时返回 Err；输出不合规时返回中性评审
    pub async fn evaluate(
        &self,
        result: &Value,
        goal: &str,
        context: Option<&Map<String, Value>>,
    ) -> Result<Critique, AgentError> {
        let prompt = Self::build_prompt(result, goal, context);
        let response = self
            .llm
            .query(&prompt, CRITIC_SYSTEM_PROMPT, Some(self.temperature))
            .await?;
        let critique = parse_critique(&response);
        tracing::info!(
            overall = critique.overall_score,
            should_iterate = critique.should_iterate,
            confidence = critique.confidence,
            "result critiqued"
        );
        Ok(critique)
    }
}
