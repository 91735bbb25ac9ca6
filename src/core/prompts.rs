//! Prompt 构建：固定循环的生成 / 批评 / 精炼 / 裁决，以及流水线各角色

use indexmap::IndexMap;

use crate::core::{AgentRole, PipelineState};

/// 生成：问题 + 质量要求 + 可选上下文
pub fn generation(query: &str, rubric: &str, context: Option<&str>) -> String {
    let mut prompt = format!(
        "{query}\n\nDesign/quality requirements:\n{rubric}\n\nProvide a complete, well-structured response."
    );
    push_context(&mut prompt, context);
    prompt
}

pub fn critique(query: &str, response: &str) -> String {
    format!(
        "Critique this response to the user query.\n\nUser Query: {query}\n\nResponse:\n{response}\n\n\
         Point out errors, missing requirements and concrete improvements."
    )
}

/// 精炼：用上一版回答与批评作为上下文重新生成
pub fn refinement(query: &str, rubric: &str, response: &str, critique: &str) -> String {
    format!(
        "{query}\n\nDesign/quality requirements:\n{rubric}\n\n\
         Previous response:\n{response}\n\nCritique:\n{critique}\n\n\
         Produce an improved, complete response that addresses the critique."
    )
}

/// 裁决：要求只返回 JSON
pub fn verdict(query: &str, rubric: &str, response: &str, critique: &str) -> String {
    format!(
        "You are the final arbiter. Return ONLY JSON of the form \
         {{\"satisfied\": bool, \"best_answer\": string, \"evaluation_notes\": string}}.\n\
         Satisfied? {rubric}\nUser Query: {query}\nResponse: {response}\nCritique: {critique}\n"
    )
}

/// 流水线步骤的角色 prompt
pub fn pipeline_step(
    role: AgentRole,
    query: &str,
    iteration: u32,
    state: &PipelineState,
    rubric: &str,
    context: Option<&str>,
    summary_cap_chars: usize,
) -> String {
    match role {
        AgentRole::Generator => {
            let mut prompt = query.to_string();
            if iteration > 1 && !state.is_empty() {
                prompt.push_str("\n\nPrevious responses (summarized):\n");
                prompt.push_str(&summarize(state.responses(), summary_cap_chars));
                prompt.push_str("\n\nRefine and improve on the previous responses.");
            }
            prompt.push_str("\n\nDesign/quality requirements:\n");
            prompt.push_str(rubric);
            push_context(&mut prompt, context);
            prompt
        }
        AgentRole::Critic => format!(
            "User Query: {query}\n\nResponses so far:\n{}\n\n\
             Critique these responses for correctness, quality, completeness, and possible improvements.",
            dump(state.responses())
        ),
        AgentRole::Refiner => format!(
            "User Query: {query}\n\nResponses so far:\n{}\n\n\
             Produce a single improved answer that combines the strengths of these responses and fixes their weaknesses.",
            dump(state.responses())
        ),
        AgentRole::Analyzer => format!(
            "Analyze the following request. List the requirements, the main challenges, \
             a suggested approach, and any dependencies.\n\nRequest: {query}"
        ),
        AgentRole::Custom => query.to_string(),
    }
}

fn push_context(prompt: &mut String, context: Option<&str>) {
    if let Some(ctx) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\n\nContext:\n");
        prompt.push_str(ctx);
    }
}

/// 完整输出，不截断
fn dump(responses: &IndexMap<String, String>) -> String {
    responses
        .iter()
        .map(|(agent, text)| format!("[{}]:\n{}", agent, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 每个 agent 的输出各自截断到 cap 个字符
fn summarize(responses: &IndexMap<String, String>, cap: usize) -> String {
    responses
        .iter()
        .map(|(agent, text)| {
            let mut short: String = text.chars().take(cap).collect();
            if text.chars().count() > cap {
                short.push_str("...");
            }
            format!("[{}]: {}", agent, short)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineStep;

    fn state() -> PipelineState {
        let mut state = PipelineState::default();
        state.record(&PipelineStep::new("gen", AgentRole::Generator), "a".repeat(50));
        state.record(&PipelineStep::new("crit", AgentRole::Critic), "needs tests".into());
        state
    }

    #[test]
    fn test_generation_includes_rubric_and_context() {
        let p = generation("sort a list", "- be fast\n", Some("prior chat"));
        assert!(p.starts_with("sort a list\n\nDesign/quality requirements:\n- be fast\n"));
        assert!(p.ends_with("Context:\nprior chat"));
        assert!(!generation("q", "r", Some("  ")).contains("Context:"));
    }

    #[test]
    fn test_generator_summary_only_after_first_iteration() {
        let s = state();
        let first = pipeline_step(AgentRole::Generator, "q", 1, &s, "rubric", None, 10);
        assert!(!first.contains("Previous responses"));

        let second = pipeline_step(AgentRole::Generator, "q", 2, &s, "rubric", None, 10);
        assert!(second.contains(&format!("[gen]: {}...", "a".repeat(10))));
        assert!(!second.contains(&"a".repeat(11)));
        assert!(second.contains("[crit]: needs tests"));
        assert!(second.contains("rubric"));
    }

    #[test]
    fn test_critic_and_refiner_get_full_dump() {
        let s = state();
        for role in [AgentRole::Critic, AgentRole::Refiner] {
            let p = pipeline_step(role, "q", 1, &s, "rubric", None, 10);
            assert!(p.contains(&"a".repeat(50)));
            assert!(!p.contains("rubric"));
        }
    }

    #[test]
    fn test_analyzer_and_custom() {
        let s = state();
        let analyzer = pipeline_step(AgentRole::Analyzer, "build it", 2, &s, "r", None, 10);
        assert!(analyzer.contains("Request: build it"));
        assert!(!analyzer.contains("[gen]"));
        assert_eq!(pipeline_step(AgentRole::Custom, "build it", 2, &s, "r", Some("c"), 10), "build it");
    }
}
