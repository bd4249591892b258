use crate::domain::{BranchTarget, EffectiveTemplate, Host, StepType, Template, VariableBindings};
use crate::error::{Result, SurveyError};

/// Storage-agnostic template lookup. Concrete backends (file, sqlite) live
/// outside this crate so the resolver stays testable with in-memory fakes.
pub trait TemplateLoader: Send + Sync {
    fn get(&self, template_id: &str) -> Result<Template>;
}

pub trait HostLoader: Send + Sync {
    fn get(&self, host_id: &str) -> Result<Host>;
}

/// Replace every `{{key}}` with its binding; unknown tokens pass through
/// literally. Scans for the next `{{` / `}}` pair rather than using a
/// regex — the token grammar is fixed and this keeps the crate dependency
/// set to what the rest of the workspace already needs.
pub fn apply_variables(text: &str, bindings: &VariableBindings) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        let Some(end_rel) = rest[start + 2..].find("}}") else {
            out.push_str(rest);
            break;
        };
        let end = start + 2 + end_rel;
        let key = &rest[start + 2..end];
        out.push_str(&rest[..start]);
        match bindings.get(key.trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..end + 2]),
        }
        rest = &rest[end + 2..];
    }
    out
}

fn host_role(host: Option<&Host>) -> String {
    host.map(|h| h.role.clone()).unwrap_or_default()
}

/// Assemble the effective system prompt: `host_role \n system_prompt \n
/// "# 背景知识\n" + background`, omitting the background section when it
/// is empty or whitespace-only.
fn assemble_system_prompt(host_role: &str, system_prompt: &str, background: &str) -> String {
    let mut parts = Vec::new();
    if !host_role.is_empty() {
        parts.push(host_role.to_string());
    }
    parts.push(system_prompt.to_string());
    if !background.trim().is_empty() {
        parts.push(format!("# 背景知识\n{background}"));
    }
    parts.join("\n")
}

fn substitute_step(step: &crate::domain::Step, bindings: &VariableBindings) -> crate::domain::Step {
    let content = apply_variables(&step.content, bindings);
    let step_type = match &step.step_type {
        StepType::Linear => StepType::Linear,
        StepType::Condition { condition, branches } => StepType::Condition {
            condition: apply_variables(condition, bindings),
            branches: *branches,
        },
    };
    crate::domain::Step { index: step.index, content, step_type }
}

/// Validate a CONDITION step's branches are well-formed relative to the
/// step list length — a malformed branch value at template-validation time
/// is rejected outright, stronger than the at-runtime "forces end_survey"
/// fallback the engine applies to an in-range-but-unreachable reference.
pub fn validate_template(template: &Template) -> Result<()> {
    if template.steps.is_empty() {
        return Err(SurveyError::Validation("template has no steps".into()));
    }
    if template.max_turns == 0 {
        return Err(SurveyError::Validation("max_turns must be > 0".into()));
    }
    for step in &template.steps {
        if let StepType::Condition { branches, .. } = &step.step_type {
            for branch in branches {
                if let BranchTarget::Step(n) = branch {
                    if *n > template.steps.len() {
                        return Err(SurveyError::Validation(format!(
                            "step {} branch target {} is out of range",
                            step.index, n
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// `resolve(template_id) -> EffectiveTemplate`: loads the template, resolves
/// its host (if any), substitutes `{{key}}` across every textual field, and
/// assembles the effective system prompt.
pub fn resolve(
    template_id: &str,
    templates: &dyn TemplateLoader,
    hosts: &dyn HostLoader,
) -> Result<EffectiveTemplate> {
    let template = templates
        .get(template_id)
        .map_err(|_| SurveyError::TemplateNotFound(template_id.to_string()))?;
    validate_template(&template)?;

    let host = match &template.host_id {
        Some(id) => Some(hosts.get(id).map_err(|_| SurveyError::HostNotFound(id.clone()))?),
        None => None,
    };

    let bindings = &template.variables;
    let system_prompt = apply_variables(&template.system_prompt, bindings);
    let background = apply_variables(&template.background_knowledge, bindings);
    let welcome_message = apply_variables(&template.welcome_message, bindings);
    let end_message = apply_variables(&template.end_message, bindings);
    let steps = template.steps.iter().map(|s| substitute_step(s, bindings)).collect();

    Ok(EffectiveTemplate {
        id: template.id,
        system_prompt: assemble_system_prompt(&host_role(host.as_ref()), &system_prompt, &background),
        welcome_message,
        end_message,
        max_turns: template.max_turns,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Step;
    use std::collections::HashMap;

    fn bindings(pairs: &[(&str, &str)]) -> VariableBindings {
        VariableBindings(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn apply_variables_substitutes_known_and_preserves_unknown_tokens() {
        let b = bindings(&[("name", "Bob"), ("topic", "tea")]);
        let out = apply_variables("Hello {{name}}, about {{topic}} and {{missing}}", &b);
        assert_eq!(out, "Hello Bob, about tea and {{missing}}");
    }

    #[test]
    fn apply_variables_is_idempotent() {
        let b = bindings(&[("name", "Bob")]);
        let once = apply_variables("Hi {{name}}", &b);
        let twice = apply_variables(&once, &b);
        assert_eq!(once, twice);
    }

    #[test]
    fn system_prompt_omits_background_section_when_blank() {
        let prompt = assemble_system_prompt("host", "base prompt", "   ");
        assert_eq!(prompt, "host\nbase prompt");
        let with_bg = assemble_system_prompt("host", "base prompt", "facts");
        assert_eq!(with_bg, "host\nbase prompt\n# 背景知识\nfacts");
    }

    #[test]
    fn validate_template_rejects_condition_step_with_out_of_range_branch() {
        let template = Template {
            id: "t1".into(),
            theme: String::new(),
            system_prompt: String::new(),
            background_knowledge: String::new(),
            max_turns: 3,
            welcome_message: String::new(),
            end_message: String::new(),
            steps: vec![Step {
                index: 0,
                content: String::new(),
                step_type: StepType::Condition {
                    condition: "x".into(),
                    branches: [BranchTarget::End, BranchTarget::Step(5)],
                },
            }],
            variables: VariableBindings(HashMap::new()),
            host_id: None,
        };
        assert!(validate_template(&template).is_err());
    }
}
