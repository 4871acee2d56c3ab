//! Prompt assembly for the planner and answer-synthesis completion calls.

/// Uploaded YAML is truncated to this many characters in the planner prompt
/// to cap prompt size.
pub const YAML_SNIPPET_MAX_CHARS: usize = 2000;

/// Aggregated tool payloads are truncated to this many characters in the
/// answer prompt.
pub const PAYLOAD_SNIPPET_MAX_CHARS: usize = 4000;

/// Case-insensitive markers suggesting a schema/specification question that
/// should be answered with the Pricing2Yaml excerpt at hand.
const SPEC_KEYWORDS: [&str; 6] =
    ["pricing2yaml", "pricing 2 yaml", "yaml spec", "schema", "syntax", "ipricing"];

pub const PLAN_SYSTEM_PROMPT: &str = r#"You orchestrate pricing intelligence workflows.

Actions you can sequence:
- "subscriptions": calls the analysis service to enumerate every subscription configuration. With no filters it returns the full configuration space; with filters it limits to matching options. The payload always includes "cardinality" so you know the configuration-space size after applying filters.
- "optimal": runs the optimizer over the configuration space. With objective="minimize" (default) it returns the cheapest matching subscription; with objective="maximize" it returns the most expensive. Any filters reduce the search space and the payload still reports the resulting cardinality.
- "summary": produces a textual synopsis of the pricing context or latest tool outputs without performing heavy analysis. Use it to brief the user or when no data-backed action is necessary.

Given the user's request and context, respond with JSON containing:
- actions: ordered list of zero or more actions. Each entry may be a string (e.g. "summary") or an object like {"name": "optimal", "objective": "maximize"}. Use objects when you need to override the default objective or other parameters for a single step. Use an empty list when you can answer directly without tools.
- pricing_url: optional URL inferred from the conversation.
- requires_uploaded_yaml: true only when a user-provided Pricing2Yaml file is mandatory to proceed.
- intent_summary: concise natural-language rationale describing how the plan addresses the request.
- filters: optional JSON object with precise constraints (e.g. {"maxMonthlyPrice": 100, "requiredFeatures": ["standardSupport"]}). Mention how the filters will influence the configuration space.
- objective: fallback objective for optimal steps that do not define their own objective (default "minimize").
- solver: "minizinc" or "choco" (prefer "minizinc" unless the user asks otherwise).
- refresh: true only when a new transformation is required because fresh pricing data (URL or YAML) was provided.
- use_pricing2yaml_spec: boolean indicating whether the answer should consult the Pricing2Yaml specification excerpt provided by the system.

Guidance:
- Consider chaining actions for complex questions (e.g. [{"name": "subscriptions"}, {"name": "optimal", "objective": "maximize"}]).
- Always reference detected pricing URLs in pricing_url; do not invent links.
- Choose empty actions only when existing knowledge or the specification excerpt is sufficient to answer confidently.
- Set requires_uploaded_yaml to true only when the assistant cannot proceed without a local file; otherwise keep it false to avoid blocking the user.
- When the user asks about schema, syntax, or validation details, set use_pricing2yaml_spec to true.
- Keep filters as a JSON object; omit the key when no constraints are required.

Always return strictly valid JSON with double quotes and no trailing text.
"#;

pub const ANSWER_SYSTEM_PROMPT: &str = r#"You are a pricing intelligence assistant.
Use the provided plan, tool payload (which may be empty), and optional Pricing2Yaml excerpt to answer conversationally.
- Explain recommended plans or insights and reference key metrics such as price, objective value, or configuration cardinality when available.
- If use_pricing2yaml_spec is true, consult the supplied specification excerpt for authoritative details.
- When no actions ran, clarify that the response is based on existing context and highlight any assumptions.
- If tooling reported errors or missing inputs, communicate them plainly and request the needed information.
"#;

pub fn build_plan_prompt(
    question: &str,
    pricing_url: Option<&str>,
    yaml_content: Option<&str>,
    spec_excerpt: Option<&str>,
) -> String {
    let mut sections = vec![PLAN_SYSTEM_PROMPT.to_string(), format!("Question: {question}")];
    if let Some(url) = pricing_url {
        sections.push(format!("Candidate pricing URL: {url}"));
    }
    match yaml_content {
        Some(yaml) => {
            sections.push(format!(
                "User provided YAML snippet (truncated to {YAML_SNIPPET_MAX_CHARS} characters):"
            ));
            sections.push(truncate_chars(yaml, YAML_SNIPPET_MAX_CHARS));
        }
        None => sections.push("User provided YAML: False".to_string()),
    }
    if let Some(excerpt) = spec_excerpt {
        sections.push("Pricing2Yaml specification excerpt (truncated):".to_string());
        sections.push(excerpt.to_string());
    }
    sections.join("\n")
}

pub fn build_answer_prompt(
    question: &str,
    plan_json: &str,
    payload_json: &str,
    spec_excerpt: Option<&str>,
) -> String {
    let mut sections = vec![
        ANSWER_SYSTEM_PROMPT.to_string(),
        format!("Question: {question}"),
        format!("Plan: {plan_json}"),
        format!("Tool payload: {}", truncate_chars(payload_json, PAYLOAD_SNIPPET_MAX_CHARS)),
    ];
    if let Some(excerpt) = spec_excerpt {
        sections.push("Pricing2Yaml specification excerpt (truncated):".to_string());
        sections.push(excerpt.to_string());
    }
    sections.join("\n")
}

pub fn question_mentions_spec(question: &str) -> bool {
    let lowered = question.to_lowercase();
    SPEC_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
