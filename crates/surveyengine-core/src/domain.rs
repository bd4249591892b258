use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A vertex in the compiled survey graph.
///
/// Replaces the source's dynamic string labels (`"0_q"`, `"0_a"`,
/// `"end_survey"`) with a tagged variant so the executor can match on it
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    QuestionNode(usize),
    AnswerNode(usize),
    End,
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeLabel::QuestionNode(i) => write!(f, "{i}_q"),
            NodeLabel::AnswerNode(i) => write!(f, "{i}_a"),
            NodeLabel::End => write!(f, "end_survey"),
        }
    }
}

impl FromStr for NodeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "end_survey" {
            return Ok(NodeLabel::End);
        }
        let (idx, suffix) = s.split_once('_').ok_or_else(|| format!("malformed node label: {s}"))?;
        let idx: usize = idx.parse().map_err(|_| format!("malformed node label: {s}"))?;
        match suffix {
            "q" => Ok(NodeLabel::QuestionNode(idx)),
            "a" => Ok(NodeLabel::AnswerNode(idx)),
            _ => Err(format!("malformed node label: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    System,
    Human,
    Assistant,
}

/// A value attached to a Message's auxiliary attributes.
///
/// `Runtime` leaves model the source's event loops, futures, tasks,
/// functions, and generators — values that are never carried across a
/// serializer round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<AttributeValue>),
    Map(HashMap<String, AttributeValue>),
    Runtime(RuntimeKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeKind {
    EventLoop,
    Future,
    Task,
    Coroutine,
    Function,
    Generator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, AttributeValue>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into(), attributes: None }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Human, content: content.into(), attributes: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into(), attributes: None }
    }
}

/// `"END"` or a 1-based step number, as written in template JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BranchTarget {
    End,
    Step(usize),
}

impl TryFrom<String> for BranchTarget {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.eq_ignore_ascii_case("end") {
            return Ok(BranchTarget::End);
        }
        let n: usize = s.parse().map_err(|_| format!("malformed branch target: {s}"))?;
        if n == 0 {
            return Err(format!("malformed branch target: {s}"));
        }
        Ok(BranchTarget::Step(n))
    }
}

impl From<BranchTarget> for String {
    fn from(b: BranchTarget) -> Self {
        match b {
            BranchTarget::End => "END".to_string(),
            BranchTarget::Step(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum StepType {
    Linear,
    Condition {
        condition: String,
        branches: [BranchTarget; 2],
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Zero-based position in the template's step list.
    pub index: usize,
    pub content: String,
    #[serde(flatten)]
    pub step_type: StepType,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariableBindings(pub HashMap<String, String>);

impl VariableBindings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub theme: String,
    pub system_prompt: String,
    #[serde(default)]
    pub background_knowledge: String,
    pub max_turns: u32,
    pub welcome_message: String,
    pub end_message: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub variables: VariableBindings,
    pub host_id: Option<String>,
}

/// A template after `{{key}}` substitution and host resolution, ready to
/// seed a session.
#[derive(Debug, Clone)]
pub struct EffectiveTemplate {
    pub id: String,
    pub system_prompt: String,
    pub welcome_message: String,
    pub end_message: String,
    pub max_turns: u32,
    pub steps: Vec<Step>,
}

/// One live conversation's durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub steps: Vec<Step>,
    pub system_prompt: String,
    pub end_message: String,
    pub max_turns: u32,
    pub current_step: NodeLabel,
    pub current_step_messages: Vec<Message>,
}

impl SessionState {
    /// `|current_step_messages| ≥ 2*max_turns + 1` — the turn-count bound
    /// named in §4.4.2 of the question-node contract.
    pub fn turn_bound_reached(&self) -> bool {
        self.current_step_messages.len() as u64 >= 2 * self.max_turns as u64 + 1
    }

    /// Reset the per-step transcript on entry into `label`, per §4.4.4's
    /// "re-entry into a different step index resets current_step_messages".
    pub fn enter_step(&mut self, label: NodeLabel) {
        let changed_index = match (self.current_step, label) {
            (NodeLabel::QuestionNode(a) | NodeLabel::AnswerNode(a), NodeLabel::QuestionNode(b) | NodeLabel::AnswerNode(b)) => a != b,
            _ => true,
        };
        if changed_index {
            self.current_step_messages.clear();
        }
        self.current_step = label;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_label_round_trips_through_wire_form() {
        for (label, text) in [
            (NodeLabel::QuestionNode(0), "0_q"),
            (NodeLabel::AnswerNode(3), "3_a"),
            (NodeLabel::End, "end_survey"),
        ] {
            assert_eq!(label.to_string(), text);
            assert_eq!(text.parse::<NodeLabel>().unwrap(), label);
        }
    }

    #[test]
    fn node_label_rejects_malformed_text() {
        assert!("7_x".parse::<NodeLabel>().is_err());
        assert!("nope".parse::<NodeLabel>().is_err());
    }

    #[test]
    fn branch_target_parses_end_case_insensitively_and_step_numbers() {
        assert_eq!(BranchTarget::try_from("END".to_string()).unwrap(), BranchTarget::End);
        assert_eq!(BranchTarget::try_from("end".to_string()).unwrap(), BranchTarget::End);
        assert_eq!(BranchTarget::try_from("3".to_string()).unwrap(), BranchTarget::Step(3));
        assert!(BranchTarget::try_from("0".to_string()).is_err());
        assert!(BranchTarget::try_from("nope".to_string()).is_err());
    }
}
