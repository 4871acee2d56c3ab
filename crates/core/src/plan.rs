//! Execution-plan data model and the lenient validation pass that turns the
//! planner's free-form JSON into trusted, typed values.
//!
//! The planner output is a dynamically-shaped contract: entries may be bare
//! strings or objects, fields may be mistyped, and single values may arrive
//! as lists. Every field is validated here before the rest of the pipeline
//! sees it. Invalid action entries are dropped with a warning rather than
//! failing the request; the plan continues with whatever remains.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Sentinel reference used when the caller supplied document content but no
/// URL, so downstream actions know pricing context exists.
pub const UPLOADED_DOCUMENT_REFERENCE: &str = "uploaded://pricing";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner response was not a JSON object")]
    NotAnObject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionName {
    Optimal,
    Subscriptions,
    Summary,
}

impl ActionName {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "optimal" => Some(Self::Optimal),
            "subscriptions" => Some(Self::Subscriptions),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optimal => "optimal",
            Self::Subscriptions => "subscriptions",
            Self::Summary => "summary",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    #[default]
    Minimize,
    Maximize,
}

impl Objective {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "minimize" => Some(Self::Minimize),
            "maximize" => Some(Self::Maximize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimize => "minimize",
            Self::Maximize => "maximize",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    #[default]
    Minizinc,
    Choco,
}

impl Solver {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "minizinc" => Some(Self::Minizinc),
            "choco" => Some(Self::Choco),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minizinc => "minizinc",
            Self::Choco => "choco",
        }
    }
}

/// One validated step of an execution plan.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlannedAction {
    pub name: ActionName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective: Option<Objective>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_url: Option<String>,
}

impl PlannedAction {
    pub fn bare(name: ActionName) -> Self {
        Self { name, objective: None, pricing_url: None }
    }
}

/// Structured intent produced by the planner, after validation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Plan {
    pub actions: Vec<PlannedAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_url: Option<String>,
    pub requires_uploaded_yaml: bool,
    pub solver: Solver,
    pub objective: Objective,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Map<String, Value>>,
    pub refresh: bool,
    pub use_pricing2yaml_spec: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_summary: Option<String>,
}

impl Plan {
    /// Validates the raw planner JSON into a typed plan. Only a non-object
    /// top level is fatal; every field-level problem is recovered by
    /// dropping or defaulting the offending value with a warning.
    pub fn from_value(raw: &Value) -> Result<Self, PlanError> {
        let object = raw.as_object().ok_or(PlanError::NotAnObject)?;

        let actions = normalize_actions(object.get("actions"));
        let pricing_url = collapse_reference(object.get("pricing_url"));
        let requires_uploaded_yaml =
            object.get("requires_uploaded_yaml").and_then(Value::as_bool).unwrap_or(false);
        let solver = parse_solver(object.get("solver"));
        let objective = parse_plan_objective(object.get("objective"));
        let filters = extract_filters(object.get("filters"));
        let refresh = object.get("refresh").and_then(Value::as_bool).unwrap_or(false);
        let use_pricing2yaml_spec =
            object.get("use_pricing2yaml_spec").and_then(Value::as_bool).unwrap_or(false);
        let intent_summary =
            object.get("intent_summary").and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            actions,
            pricing_url,
            requires_uploaded_yaml,
            solver,
            objective,
            filters,
            refresh,
            use_pricing2yaml_spec,
            intent_summary,
        })
    }
}

fn normalize_actions(raw: Option<&Value>) -> Vec<PlannedAction> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let entries = match raw {
        Value::Null => return Vec::new(),
        Value::Array(entries) => entries,
        other => {
            warn!(requested = %other, "planner actions field was not a list");
            return Vec::new();
        }
    };

    entries.iter().filter_map(parse_action_entry).collect()
}

fn parse_action_entry(entry: &Value) -> Option<PlannedAction> {
    match entry {
        Value::String(name) => match ActionName::parse(name) {
            Some(name) => Some(PlannedAction::bare(name)),
            None => {
                warn!(requested = %name, "unsupported planner action");
                None
            }
        },
        Value::Object(fields) => {
            let name = match fields.get("name").and_then(Value::as_str).map(ActionName::parse) {
                Some(Some(name)) => name,
                _ => {
                    warn!(requested = %entry, "invalid planner action object");
                    return None;
                }
            };

            let objective = match fields.get("objective") {
                None | Some(Value::Null) => None,
                Some(Value::String(value)) => {
                    let parsed = Objective::parse(value);
                    if parsed.is_none() {
                        warn!(action = name.as_str(), objective = %value, "invalid action objective discarded");
                    }
                    parsed
                }
                Some(other) => {
                    warn!(action = name.as_str(), objective = %other, "invalid action objective discarded");
                    None
                }
            };

            let raw_url = fields.get("pricing_url").or_else(|| fields.get("url"));
            let pricing_url = match raw_url {
                None | Some(Value::Null) => None,
                Some(Value::String(url)) => Some(url.clone()),
                Some(other) => {
                    warn!(action = name.as_str(), pricing_url = %other, "non-string action pricing_url discarded");
                    None
                }
            };

            Some(PlannedAction { name, objective, pricing_url })
        }
        other => {
            warn!(entry = %other, "unrecognized planner action entry");
            None
        }
    }
}

/// Collapses the planner's reference value to a single candidate: a string
/// passes through, a non-empty list yields its first string element.
fn collapse_reference(raw: Option<&Value>) -> Option<String> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(url)) => Some(url.clone()),
        Some(Value::Array(candidates)) => {
            candidates.first().and_then(Value::as_str).map(str::to_string)
        }
        Some(other) => {
            warn!(pricing_url = %other, "unexpected planner pricing_url shape");
            None
        }
    }
}

fn parse_solver(raw: Option<&Value>) -> Solver {
    match raw.and_then(Value::as_str) {
        None => Solver::default(),
        Some(value) => Solver::parse(value).unwrap_or_else(|| {
            warn!(solver = %value, "unknown solver requested, using default");
            Solver::default()
        }),
    }
}

fn parse_plan_objective(raw: Option<&Value>) -> Objective {
    match raw.and_then(Value::as_str) {
        None => Objective::default(),
        Some(value) => Objective::parse(value).unwrap_or_else(|| {
            warn!(objective = %value, "unknown plan objective, using default");
            Objective::default()
        }),
    }
}

fn extract_filters(raw: Option<&Value>) -> Option<Map<String, Value>> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(other) => {
            warn!(provided = %other, "malformed filters value discarded");
            None
        }
    }
}

/// Effective pricing reference for a request, in priority order: the plan's
/// own reference, then the caller-supplied one, then the uploaded-document
/// sentinel when only document content exists.
pub fn resolve_pricing_reference(
    plan_url: Option<&str>,
    caller_url: Option<&str>,
    has_document: bool,
) -> Option<String> {
    let url = plan_url.or(caller_url).map(str::to_string);
    if url.is_none() && has_document {
        return Some(UPLOADED_DOCUMENT_REFERENCE.to_string());
    }
    url
}

/// Per-action inputs derived from the plan and the effects of earlier
/// actions in the same request. Pure over its inputs so execution order can
/// be tested without the full pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionInputs {
    pub url: Option<String>,
    pub refresh: bool,
    /// Uploaded document content is only forwarded when the action targets
    /// the request-level reference; an action pinned to a different URL
    /// does not also receive the original upload.
    pub forward_document: bool,
}

impl ActionInputs {
    pub fn derive(
        action: &PlannedAction,
        default_url: Option<&str>,
        refresh_requested: bool,
        refreshed_urls: &HashSet<String>,
    ) -> Self {
        let url = action.pricing_url.as_deref().or(default_url).map(str::to_string);
        let refresh = match &url {
            Some(url) => refresh_requested && !refreshed_urls.contains(url),
            None => false,
        };
        let forward_document = match (&url, default_url) {
            (None, _) => true,
            (Some(url), Some(default)) => url == default,
            (Some(_), None) => false,
        };
        Self { url, refresh, forward_document }
    }
}
