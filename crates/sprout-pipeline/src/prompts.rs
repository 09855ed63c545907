//! Prompt builders for the three pipeline phases
//!
//! Explainability is prompt policy only: when a job has `explain` set the
//! coding prompt asks for generous comments plus a trailing
//! `<explanation>` block, otherwise it asks for minimal commentary. No
//! separate code path exists anywhere else.

use sprout_core::{PlannedFile, ProjectPlan};

const EXPLANATION_OPEN: &str = "<explanation>";
const EXPLANATION_CLOSE: &str = "</explanation>";

/// Build the planning-phase prompt
///
/// The output contract is strict JSON so `ProjectPlan::from_model_output`
/// can parse the reply directly.
pub fn build_planning_prompt(user_prompt: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("# PROJECT PLANNING\n\n");
    prompt.push_str("You are the planning stage of an automated project generator.\n\n");

    prompt.push_str("## REQUEST\n\n");
    prompt.push_str(user_prompt.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## OUTPUT CONTRACT\n\n");
    prompt.push_str("Respond with a single JSON object and nothing else:\n\n");
    prompt.push_str(
        r#"{
  "project_name": "short-kebab-case-name",
  "stack": ["technology", "..."],
  "directories": ["relative/dir"],
  "files": [
    {"path": "relative/path", "purpose": "one line", "language": "language", "api_endpoint": false}
  ],
  "dependencies": {"package": "version constraint"}
}
"#,
    );
    prompt.push('\n');

    prompt.push_str("## RULES\n\n");
    prompt.push_str("- Every file the project needs appears exactly once in \"files\".\n");
    prompt.push_str("- Paths are relative, unix style, without a leading \"./\".\n");
    prompt.push_str("- Set \"api_endpoint\": true on files that expose HTTP endpoints.\n");
    prompt.push_str("- Keep the plan minimal but sufficient for a working project.\n");

    prompt
}

/// Build the coding-phase prompt for one planned file
pub fn build_code_file_prompt(plan: &ProjectPlan, file: &PlannedFile, explain: bool) -> String {
    let mut prompt = String::new();

    prompt.push_str("# FILE GENERATION\n\n");
    prompt.push_str(&format!(
        "You are generating one file of the project \"{}\".\n\n",
        plan.project_name
    ));

    // Project context
    prompt.push_str("## PROJECT\n\n");
    if !plan.stack.is_empty() {
        prompt.push_str(&format!("**Stack:** {}\n", plan.stack.join(", ")));
    }
    if !plan.dependencies.is_empty() {
        prompt.push_str("**Dependencies:**\n");
        for (package, version) in &plan.dependencies {
            prompt.push_str(&format!("- {} {}\n", package, version));
        }
    }
    prompt.push('\n');

    prompt.push_str("## PLANNED FILES\n\n");
    for planned in &plan.files {
        prompt.push_str(&format!("- {}: {}\n", planned.path, planned.purpose));
    }
    prompt.push('\n');

    // The file to produce
    prompt.push_str("## FILE TO GENERATE\n\n");
    prompt.push_str(&format!("**Path:** {}\n", file.path));
    prompt.push_str(&format!("**Purpose:** {}\n", file.purpose));
    if let Some(language) = &file.language {
        prompt.push_str(&format!("**Language:** {}\n", language));
    }
    prompt.push('\n');

    prompt.push_str("## RULES\n\n");
    prompt.push_str("- Output only the raw file content: no markdown fence, no commentary.\n");
    prompt.push_str("- The file must be complete and consistent with the planned layout.\n");
    if explain {
        prompt.push_str("- Comment generously: explain intent inline where it is not obvious.\n");
        prompt.push_str(&format!(
            "- After the file content, append a short design explanation wrapped in {} and {} tags.\n",
            EXPLANATION_OPEN, EXPLANATION_CLOSE
        ));
    } else {
        prompt.push_str("- Keep comments minimal.\n");
    }

    prompt
}

/// Build the README prompt
pub fn build_readme_prompt(plan: &ProjectPlan, user_prompt: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("# README GENERATION\n\n");
    prompt.push_str(&format!(
        "Write the README.md for \"{}\", generated from this request:\n\n",
        plan.project_name
    ));
    prompt.push_str(user_prompt.trim());
    prompt.push_str("\n\n");

    push_plan_summary(&mut prompt, plan);

    prompt.push_str("## RULES\n\n");
    prompt.push_str("- Output raw markdown for the README.md file only.\n");
    prompt.push_str("- Cover what the project does, its layout, and how to run it.\n");

    prompt
}

/// Build the setup-guide prompt
pub fn build_setup_prompt(plan: &ProjectPlan) -> String {
    let mut prompt = String::new();

    prompt.push_str("# SETUP GUIDE GENERATION\n\n");
    prompt.push_str(&format!(
        "Write a step-by-step setup guide for \"{}\".\n\n",
        plan.project_name
    ));

    push_plan_summary(&mut prompt, plan);

    prompt.push_str("## RULES\n\n");
    prompt.push_str("- Output raw markdown only.\n");
    prompt.push_str("- Include prerequisite installation, dependency install and first run.\n");

    prompt
}

/// Build the API-reference prompt from the endpoint-tagged files
pub fn build_api_reference_prompt(plan: &ProjectPlan) -> String {
    let mut prompt = String::new();

    prompt.push_str("# API REFERENCE GENERATION\n\n");
    prompt.push_str(&format!(
        "Write the API reference for \"{}\". Endpoint files:\n\n",
        plan.project_name
    ));
    for file in plan.files.iter().filter(|f| f.api_endpoint) {
        prompt.push_str(&format!("- {}: {}\n", file.path, file.purpose));
    }
    prompt.push('\n');

    prompt.push_str("## RULES\n\n");
    prompt.push_str("- Output raw markdown only.\n");
    prompt.push_str("- Document each endpoint: method, path, parameters, response shape.\n");

    prompt
}

/// Build the architecture-explanation prompt used in explain mode
pub fn build_architecture_prompt(plan: &ProjectPlan, user_prompt: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("# ARCHITECTURE EXPLANATION\n\n");
    prompt.push_str(&format!(
        "Explain the architecture of \"{}\" to a developer new to the codebase. \
         The project was generated from this request:\n\n",
        plan.project_name
    ));
    prompt.push_str(user_prompt.trim());
    prompt.push_str("\n\n");

    push_plan_summary(&mut prompt, plan);

    prompt.push_str("## RULES\n\n");
    prompt.push_str("- Output raw markdown only.\n");
    prompt.push_str("- Walk through the layout, the role of each file and the data flow.\n");

    prompt
}

fn push_plan_summary(prompt: &mut String, plan: &ProjectPlan) {
    prompt.push_str("## PROJECT PLAN\n\n");
    if !plan.stack.is_empty() {
        prompt.push_str(&format!("**Stack:** {}\n", plan.stack.join(", ")));
    }
    prompt.push_str("**Files:**\n");
    for file in &plan.files {
        prompt.push_str(&format!("- {}: {}\n", file.path, file.purpose));
    }
    if !plan.dependencies.is_empty() {
        prompt.push_str("**Dependencies:**\n");
        for (package, version) in &plan.dependencies {
            prompt.push_str(&format!("- {} {}\n", package, version));
        }
    }
    prompt.push('\n');
}

/// Split a coding reply into file content and the optional trailing
/// explanation block
pub fn split_explanation(text: &str) -> (String, Option<String>) {
    let Some(start) = text.rfind(EXPLANATION_OPEN) else {
        return (text.trim_end().to_string(), None);
    };
    let after = &text[start + EXPLANATION_OPEN.len()..];
    let body = match after.find(EXPLANATION_CLOSE) {
        Some(end) => &after[..end],
        None => after,
    };
    let explanation = body.trim();
    let content = text[..start].trim_end().to_string();
    if explanation.is_empty() {
        (content, None)
    } else {
        (content, Some(explanation.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> ProjectPlan {
        ProjectPlan::from_model_output(
            r#"{
                "project_name": "todo-app",
                "stack": ["node", "express"],
                "files": [
                    {"path": "src/index.js", "purpose": "entry point", "language": "javascript"},
                    {"path": "src/routes.js", "purpose": "endpoints", "api_endpoint": true}
                ],
                "dependencies": {"express": "^4.18.0"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_planning_prompt_carries_request_and_contract() {
        let prompt = build_planning_prompt("build a todo app");
        assert!(prompt.contains("build a todo app"));
        assert!(prompt.contains("\"project_name\""));
        assert!(prompt.contains("api_endpoint"));
    }

    #[test]
    fn test_code_prompt_explain_mode_toggles_rules() {
        let plan = sample_plan();
        let file = plan.file("src/index.js").unwrap();

        let plain = build_code_file_prompt(&plan, file, false);
        assert!(plain.contains("src/index.js"));
        assert!(plain.contains("entry point"));
        assert!(plain.contains("Keep comments minimal"));
        assert!(!plain.contains(EXPLANATION_OPEN));

        let explained = build_code_file_prompt(&plan, file, true);
        assert!(explained.contains("Comment generously"));
        assert!(explained.contains(EXPLANATION_OPEN));
    }

    #[test]
    fn test_api_reference_prompt_lists_only_endpoint_files() {
        let prompt = build_api_reference_prompt(&sample_plan());
        assert!(prompt.contains("src/routes.js"));
        assert!(!prompt.contains("- src/index.js"));
    }

    #[test]
    fn test_split_explanation_extracts_trailing_block() {
        let reply = "const x = 1;\n<explanation>\nKeeps state minimal.\n</explanation>";
        let (content, explanation) = split_explanation(reply);
        assert_eq!(content, "const x = 1;");
        assert_eq!(explanation.as_deref(), Some("Keeps state minimal."));
    }

    #[test]
    fn test_split_explanation_without_block() {
        let (content, explanation) = split_explanation("const x = 1;\n");
        assert_eq!(content, "const x = 1;");
        assert!(explanation.is_none());
    }

    #[test]
    fn test_split_explanation_unterminated_block() {
        let reply = "code\n<explanation>missing close tag";
        let (content, explanation) = split_explanation(reply);
        assert_eq!(content, "code");
        assert_eq!(explanation.as_deref(), Some("missing close tag"));
    }
}
