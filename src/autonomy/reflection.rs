//! 反思：从评审中提炼教训，写入长期经验与短期记忆

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::autonomy::types::Critique;
use crate::core::AgentError;
use crate::memory::{Experience, MemoryStore, MemoryType};
use crate::planning::Plan;

/// 低于该分数的维度会产生一条改进提示
const DIMENSION_FLOOR: f64 = 0.6;
/// 成功判定：总分达到该值且评审不要求继续迭代
pub const SUCCESS_SCORE: f64 = 0.7;
const LIST_LIMIT: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct ReflectionOutcome {
    pub experience_id: String,
    pub lessons: Vec<String>,
    pub success: bool,
    pub summary: String,
}

pub struct Reflection {
    memory: Arc<MemoryStore>,
}

impl Reflection {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }

    pub async fn reflect(
        &self,
        goal: &str,
        plan: &Plan,
        result: &Value,
        critique: &Critique,
        elapsed: Duration,
    ) -> Result<ReflectionOutcome, AgentError> {
        let lessons = extract_lessons(critique);
        let success = is_success(critique);

        let experience = Experience::new(goal, result.clone())
            .with_plan(plan.clone())
            .with_critique(critique.clone())
            .with_success(success)
            .with_lessons(lessons.clone())
            .with_metadata("execution_time_secs", format!("{:.3}", elapsed.as_secs_f64()))
            .with_metadata("plan_version", plan.version.to_string());
        let experience_id = self.memory.long_term().store_experience(&experience).await?;

        let summary = reflection_summary(critique, &lessons);
        let mut metadata = Map::new();
        metadata.insert("experience_id".into(), json!(experience_id));
        metadata.insert("overall_score".into(), json!(critique.overall_score));
        metadata.insert("should_iterate".into(), json!(critique.should_iterate));
        self.memory
            .remember(summary.clone(), MemoryType::Reasoning, Some(metadata))
            .await;

        tracing::info!(%experience_id, success, lessons = lessons.len(), "reflection recorded");
        Ok(ReflectionOutcome {
            experience_id,
            lessons,
            success,
            summary,
        })
    }
}

pub fn is_success(critique: &Critique) -> bool {
    critique.overall_score >= SUCCESS_SCORE && !critique.should_iterate
}

pub fn extract_lessons(critique: &Critique) -> Vec<String> {
    let mut lessons = Vec::new();

    let joined = |items: &[String]| items.iter().take(LIST_LIMIT).cloned().collect::<Vec<_>>().join(", ");
    if !critique.weaknesses.is_empty() {
        lessons.push(format!("Identified weaknesses: {}", joined(&critique.weaknesses)));
    }
    if !critique.missing_components.is_empty() {
        lessons.push(format!(
            "Missing components to address: {}",
            joined(&critique.missing_components)
        ));
    }
    if !critique.improvement_suggestions.is_empty() {
        lessons.push(format!(
            "Key improvements: {}",
            joined(&critique.improvement_suggestions)
        ));
    }

    let dimensions = [
        (critique.completeness_score, "Need to improve completeness of analysis"),
        (critique.evidence_strength_score, "Need stronger evidence and data support"),
        (critique.coherence_score, "Need to improve logical coherence"),
        (critique.actionability_score, "Need more actionable recommendations"),
    ];
    lessons.extend(
        dimensions
            .iter()
            .filter(|(score, _)| *score < DIMENSION_FLOOR)
            .map(|(_, note)| note.to_string()),
    );

    if lessons.is_empty() {
        lessons.push("Execution completed with acceptable quality".to_string());
    }
    lessons
}

fn reflection_summary(critique: &Critique, lessons: &[String]) -> String {
    let mut parts = vec![
        "Reflection Summary:".to_string(),
        format!("Overall Score: {:.2}/1.0", critique.overall_score),
        format!(
            "Should Iterate: {}",
            if critique.should_iterate { "Yes" } else { "No" }
        ),
    ];
    if !critique.weaknesses.is_empty() {
        parts.push(format!("Weaknesses: {}", critique.weaknesses[..critique.weaknesses.len().min(2)].join(", ")));
    }
    if !lessons.is_empty() {
        parts.push(format!("Lessons: {}", lessons[..lessons.len().min(2)].join(", ")));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::memory::{InMemoryVectorStore, LongTermMemory, ShortTermMemory};

    fn memory() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(
            ShortTermMemory::new(10),
            LongTermMemory::new(
                Arc::new(InMemoryVectorStore::new("test")),
                Arc::new(HashingEmbedder::default()),
            ),
            1000,
        ))
    }

    #[test]
    fn test_lessons_from_lists_and_low_dimensions() {
        let mut critique = Critique::from_scores(0.5, 0.9, 0.55, 0.9);
        critique.weaknesses = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        critique.improvement_suggestions = vec!["cite sources".into()];

        let lessons = extract_lessons(&critique);
        assert_eq!(
            lessons,
            vec![
                "Identified weaknesses: a, b, c",
                "Key improvements: cite sources",
                "Need to improve completeness of analysis",
                "Need to improve logical coherence",
            ]
        );
    }

    #[test]
    fn test_clean_critique_yields_acceptable_note() {
        let critique = Critique::from_scores(0.8, 0.8, 0.8, 0.8);
        assert_eq!(
            extract_lessons(&critique),
            vec!["Execution completed with acceptable quality"]
        );
    }

    #[test]
    fn test_success_requires_score_and_no_iteration() {
        let passing = Critique::from_scores(0.8, 0.8, 0.8, 0.8);
        assert!(!is_success(&passing));
        assert!(is_success(&passing.clone().with_should_iterate(false)));
        let low = Critique::from_scores(0.6, 0.6, 0.6, 0.6).with_should_iterate(false);
        assert!(!is_success(&low));
    }

    #[tokio::test]
    async fn test_reflect_writes_both_tiers() {
        let memory = memory();
        let reflection = Reflection::new(memory.clone());
        let plan = Plan::new("find gaps", vec![]);
        let critique = Critique::from_scores(0.9, 0.9, 0.9, 0.9).with_should_iterate(false);

        let outcome = reflection
            .reflect("find gaps", &plan, &Value::from("report"), &critique, Duration::from_millis(1500))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.experience_id.starts_with("exp_"));
        assert!(outcome.summary.contains("Overall Score: 0.90/1.0"));
        assert_eq!(memory.long_term().len().await, 1);

        let entries = memory.short_term_snapshot().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].memory_type, MemoryType::Reasoning);
        assert_eq!(entries[0].metadata["experience_id"], outcome.experience_id.as_str());
    }
}
