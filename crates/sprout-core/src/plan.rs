//! Structured project plan produced by the planning phase

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, SproutError};
use crate::types::{Artifact, ArtifactKind};

/// Artifact path under which the plan itself is persisted
pub const PLAN_PATH: &str = "plan.json";

/// One file the plan schedules for generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    /// What the file is for; fed back into the coding prompt
    pub purpose: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Marks files exposing API endpoints; drives the API-reference doc
    #[serde(default)]
    pub api_endpoint: bool,
}

/// Structured plan: directory layout, tech stack, file list, dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPlan {
    pub project_name: String,
    #[serde(default)]
    pub stack: Vec<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    pub files: Vec<PlannedFile>,
    /// Package dependency name -> version constraint
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl ProjectPlan {
    /// Parse a plan out of raw model output
    ///
    /// Models frequently wrap the JSON in a markdown fence; strip it before
    /// decoding. A plan with no files, or with duplicate paths, is malformed.
    pub fn from_model_output(raw: &str) -> Result<Self> {
        let json = strip_code_fence(raw);
        let plan: ProjectPlan = serde_json::from_str(json)
            .map_err(|e| SproutError::InvalidResponse(format!("plan not parseable: {}", e)))?;
        if plan.files.is_empty() {
            return Err(SproutError::InvalidResponse(
                "plan contains no files".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for file in &plan.files {
            if !seen.insert(file.path.as_str()) {
                return Err(SproutError::InvalidResponse(format!(
                    "duplicate planned path: {}",
                    file.path
                )));
            }
        }
        Ok(plan)
    }

    /// Paths of all planned files, in plan order
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn file(&self, path: &str) -> Option<&PlannedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// True when any planned file is tagged as an API endpoint
    pub fn has_api_endpoints(&self) -> bool {
        self.files.iter().any(|f| f.api_endpoint)
    }

    /// Serialize the plan into its artifact form
    pub fn to_artifact(&self) -> Result<Artifact> {
        let content = serde_json::to_string_pretty(self)?;
        Ok(Artifact::new(PLAN_PATH, content, ArtifactKind::Plan))
    }

    /// Recover the plan from its persisted artifact
    pub fn from_artifact(artifact: &Artifact) -> Result<Self> {
        Ok(serde_json::from_str(&artifact.content)?)
    }
}

/// Strip a surrounding markdown code fence, if present
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let rest = match trimmed.strip_prefix("```") {
        Some(rest) => rest,
        None => return trimmed,
    };
    // Drop the info string ("json", ...) on the opening fence line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_JSON: &str = r#"{
        "project_name": "todo-app",
        "stack": ["node", "express"],
        "directories": ["src", "src/routes"],
        "files": [
            {"path": "src/index.js", "purpose": "entry point", "language": "javascript"},
            {"path": "src/routes/todos.js", "purpose": "todo endpoints", "language": "javascript", "api_endpoint": true}
        ],
        "dependencies": {"express": "^4.18.0"}
    }"#;

    #[test]
    fn test_parse_bare_json() {
        let plan = ProjectPlan::from_model_output(PLAN_JSON).unwrap();
        assert_eq!(plan.project_name, "todo-app");
        assert_eq!(plan.files.len(), 2);
        assert!(plan.has_api_endpoints());
        assert_eq!(plan.dependencies["express"], "^4.18.0");
    }

    #[test]
    fn test_parse_fenced_json() {
        let fenced = format!("```json\n{}\n```", PLAN_JSON);
        let plan = ProjectPlan::from_model_output(&fenced).unwrap();
        assert_eq!(plan.file_paths().len(), 2);
        assert_eq!(
            plan.file("src/index.js").unwrap().purpose,
            "entry point"
        );
    }

    #[test]
    fn test_empty_plan_rejected() {
        let raw = r#"{"project_name": "x", "files": []}"#;
        let err = ProjectPlan::from_model_output(raw).unwrap_err();
        assert!(matches!(err, SproutError::InvalidResponse(_)));
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let raw = r#"{
            "project_name": "x",
            "files": [
                {"path": "a.js", "purpose": "one"},
                {"path": "a.js", "purpose": "two"}
            ]
        }"#;
        let err = ProjectPlan::from_model_output(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_plan_artifact_round_trip() {
        let plan = ProjectPlan::from_model_output(PLAN_JSON).unwrap();
        let artifact = plan.to_artifact().unwrap();
        assert_eq!(artifact.path, PLAN_PATH);
        assert_eq!(artifact.kind, ArtifactKind::Plan);
        let recovered = ProjectPlan::from_artifact(&artifact).unwrap();
        assert_eq!(recovered, plan);
    }
}
