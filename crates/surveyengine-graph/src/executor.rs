use std::sync::Arc;

use surveyengine_checkpoint::CheckpointStore;
use surveyengine_core::domain::{BranchTarget, Message, NodeLabel, SessionState, StepType};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::instrument;

use crate::condition;
use crate::oracle::Oracle;

const ECHOED_INSTRUCTION_PREFIX: &str = "# 目标";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("oracle error: {0}")]
    Oracle(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("session is not suspended at an answer node (current: {0})")]
    NotSuspended(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[derive(Debug)]
pub enum ExecOutcome {
    Suspended,
    Completed { transcript: Vec<Message> },
}

/// Steps through question/answer/end nodes, suspending at answer nodes
/// and resuming from checkpoints. Node identity is index-addressed
/// (`state.steps` + the current `NodeLabel`) rather than a graph of
/// owning node references — "edges" are just the label a node's handler
/// assigns to `state.current_step`.
pub struct GraphExecutor {
    oracle: Arc<dyn Oracle>,
}

impl GraphExecutor {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Drive nodes from `state.current_step` until either an answer node
    /// suspends or `end_survey` completes. A checkpoint is written after
    /// every node transition.
    #[instrument(skip(self, state, checkpoints, emit), fields(thread_id = %state.thread_id))]
    pub async fn run_until_suspend(
        &self,
        state: &mut SessionState,
        checkpoints: &dyn CheckpointStore,
        emit: &UnboundedSender<String>,
    ) -> Result<ExecOutcome> {
        loop {
            let outcome = match state.current_step {
                NodeLabel::QuestionNode(i) => {
                    self.run_question_node(state, i, emit).await?;
                    None
                }
                NodeLabel::AnswerNode(_) => Some(ExecOutcome::Suspended),
                NodeLabel::End => Some(ExecOutcome::Completed { transcript: self.run_end_node(state, emit).await? }),
            };

            checkpoints
                .put(&state.thread_id, state)
                .await
                .map_err(|e| ExecutorError::Checkpoint(e.to_string()))?;

            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    /// Resume a suspended session with the user's reply to its current
    /// answer node, then drive the loop forward again.
    pub async fn resume(
        &self,
        state: &mut SessionState,
        user_reply: &str,
        checkpoints: &dyn CheckpointStore,
        emit: &UnboundedSender<String>,
    ) -> Result<ExecOutcome> {
        let NodeLabel::AnswerNode(i) = state.current_step else {
            return Err(ExecutorError::NotSuspended(state.current_step.to_string()));
        };

        let reply = Message::human(user_reply);
        state.messages.push(reply.clone());
        state.current_step_messages.push(reply);
        state.enter_step(NodeLabel::QuestionNode(i));

        self.run_until_suspend(state, checkpoints, emit).await
    }

    async fn run_question_node(&self, state: &mut SessionState, i: usize, emit: &UnboundedSender<String>) -> Result<()> {
        let step = state.steps[i].clone();

        if state.current_step_messages.is_empty() {
            let instruction = Message::assistant(step.content.clone());
            state.messages.push(instruction.clone());
            state.current_step_messages.push(instruction);
        }

        let mut text = self.oracle.invoke(&state.messages).await.map_err(|e| ExecutorError::Oracle(e.to_string()))?;
        if text.starts_with(ECHOED_INSTRUCTION_PREFIX) {
            text = self.oracle.invoke(&state.messages).await.map_err(|e| ExecutorError::Oracle(e.to_string()))?;
        }

        let finished = text.to_lowercase().contains("finish") || state.turn_bound_reached();

        if finished {
            self.advance_past_finished_step(state, i, &step.step_type).await;
        } else {
            let reply = Message::assistant(text.clone());
            state.messages.push(reply.clone());
            state.current_step_messages.push(reply);
            state.enter_step(NodeLabel::AnswerNode(i));
            let _ = emit.send(text);
        }

        Ok(())
    }

    async fn advance_past_finished_step(&self, state: &mut SessionState, i: usize, step_type: &StepType) {
        let n = state.steps.len();
        let next = match step_type {
            StepType::Linear => {
                if i + 1 < n {
                    NodeLabel::QuestionNode(i + 1)
                } else {
                    NodeLabel::End
                }
            }
            StepType::Condition { condition, branches } => {
                // An empty per-step transcript defaults to branches[1]
                // (not satisfied) without consulting the oracle.
                let verdict = if state.current_step_messages.is_empty() {
                    false
                } else {
                    condition::evaluate(self.oracle.as_ref(), condition, &state.current_step_messages).await
                };
                let target = if verdict { branches[0] } else { branches[1] };
                match target {
                    BranchTarget::End => NodeLabel::End,
                    BranchTarget::Step(k) => {
                        let idx = k - 1;
                        if idx < n {
                            NodeLabel::QuestionNode(idx)
                        } else {
                            // malformed / out-of-range branch forces end_survey
                            NodeLabel::End
                        }
                    }
                }
            }
        };
        state.enter_step(next);
        // "current_step_messages is cleared iff the step was marked
        // finished" — enforced unconditionally here since enter_step only
        // clears on an index change, and End carries no step index.
        state.current_step_messages.clear();
    }

    async fn run_end_node(&self, state: &mut SessionState, emit: &UnboundedSender<String>) -> Result<Vec<Message>> {
        let farewell = Message::assistant(state.end_message.clone());
        state.messages.push(farewell.clone());
        let _ = emit.send(farewell.content.clone());
        Ok(state.messages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockOracle;
    use surveyengine_checkpoint::InMemoryCheckpointStore;
    use surveyengine_core::domain::{BranchTarget, Step};
    use tokio::sync::mpsc;

    fn linear_template(max_turns: u32) -> (Vec<Step>, SessionState) {
        let steps = vec![
            Step { index: 0, content: "Ask name".into(), step_type: StepType::Linear },
            Step { index: 1, content: "Ask age".into(), step_type: StepType::Linear },
        ];
        let state = SessionState {
            thread_id: "t1".into(),
            messages: vec![],
            steps: steps.clone(),
            system_prompt: "sys".into(),
            end_message: "bye".into(),
            max_turns,
            current_step: NodeLabel::QuestionNode(0),
            current_step_messages: vec![],
        };
        (steps, state)
    }

    #[tokio::test]
    async fn linear_scenario_s1_runs_to_completion_and_purges() {
        let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::new(vec![
            "What is your name?".to_string(),
            "Got it, FINISH".to_string(),
            "How old are you?".to_string(),
            "Thanks, FINISH".to_string(),
        ]));
        let executor = GraphExecutor::new(oracle);
        let checkpoints = InMemoryCheckpointStore::new(3600);
        let (_, mut state) = linear_template(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = executor.run_until_suspend(&mut state, checkpoints.as_ref(), &tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Suspended));
        assert_eq!(state.current_step, NodeLabel::AnswerNode(0));
        assert_eq!(rx.recv().await.unwrap(), "What is your name?");

        let outcome = executor.resume(&mut state, "Alice", checkpoints.as_ref(), &tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Suspended));
        assert_eq!(state.current_step, NodeLabel::AnswerNode(1));
        assert_eq!(rx.recv().await.unwrap(), "How old are you?");

        let outcome = executor.resume(&mut state, "30", checkpoints.as_ref(), &tx).await.unwrap();
        match outcome {
            ExecOutcome::Completed { transcript } => {
                assert_eq!(transcript.last().unwrap().content, "bye");
            }
            _ => panic!("expected completion"),
        }
        assert_eq!(rx.recv().await.unwrap(), "bye");

        let purged = checkpoints.purge("t1").await.unwrap();
        assert!(purged > 0);
    }

    #[tokio::test]
    async fn max_turns_one_step_completes_on_the_third_message_b1() {
        let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::with_default("please tell me more about that"));
        let executor = GraphExecutor::new(oracle);
        let checkpoints = InMemoryCheckpointStore::new(3600);
        let (_, mut state) = linear_template(1);
        let (tx, _rx) = mpsc::unbounded_channel();

        executor.run_until_suspend(&mut state, checkpoints.as_ref(), &tx).await.unwrap();
        assert_eq!(state.current_step, NodeLabel::AnswerNode(0));

        let outcome = executor.resume(&mut state, "Alice", checkpoints.as_ref(), &tx).await.unwrap();
        // turn bound (2*1+1=3) forces completion even without FINISH, advancing past step 0.
        assert!(!matches!(outcome, ExecOutcome::Completed { .. }));
        assert_eq!(state.current_step, NodeLabel::AnswerNode(1));
    }

    #[tokio::test]
    async fn single_linear_step_falls_through_to_end_survey_b2() {
        let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::new(vec!["question?".to_string(), "done FINISH".to_string()]));
        let executor = GraphExecutor::new(oracle);
        let checkpoints = InMemoryCheckpointStore::new(3600);
        let steps = vec![Step { index: 0, content: "Only step".into(), step_type: StepType::Linear }];
        let mut state = SessionState {
            thread_id: "t1".into(),
            messages: vec![],
            steps,
            system_prompt: "sys".into(),
            end_message: "bye".into(),
            max_turns: 5,
            current_step: NodeLabel::QuestionNode(0),
            current_step_messages: vec![],
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        executor.run_until_suspend(&mut state, checkpoints.as_ref(), &tx).await.unwrap();
        let outcome = executor.resume(&mut state, "answer", checkpoints.as_ref(), &tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn condition_branch_end_on_y_terminates_immediately_b3() {
        let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::new(vec![
            "tell me your preference".to_string(),
            "got it FINISH".to_string(),
            "Y".to_string(),
        ]));
        let executor = GraphExecutor::new(oracle);
        let checkpoints = InMemoryCheckpointStore::new(3600);
        let steps = vec![Step {
            index: 0,
            content: "Collect preference".into(),
            step_type: StepType::Condition {
                condition: "user prefers tea".into(),
                branches: [BranchTarget::End, BranchTarget::Step(1)],
            },
        }];
        let mut state = SessionState {
            thread_id: "t1".into(),
            messages: vec![],
            steps,
            system_prompt: "sys".into(),
            end_message: "bye".into(),
            max_turns: 5,
            current_step: NodeLabel::QuestionNode(0),
            current_step_messages: vec![],
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        executor.run_until_suspend(&mut state, checkpoints.as_ref(), &tx).await.unwrap();
        let outcome = executor.resume(&mut state, "I like tea", checkpoints.as_ref(), &tx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn condition_backward_branch_reenters_step_with_cleared_messages_b4() {
        let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::new(vec![
            "q0".to_string(),
            "ask-cond".to_string(),
            "done FINISH".to_string(),
            "N".to_string(),
        ]));
        let executor = GraphExecutor::new(oracle);
        let checkpoints = InMemoryCheckpointStore::new(3600);
        let steps = vec![
            Step { index: 0, content: "step0".into(), step_type: StepType::Linear },
            Step { index: 1, content: "step1".into(), step_type: StepType::Linear },
            Step {
                index: 2,
                content: "step2 cond".into(),
                step_type: StepType::Condition {
                    condition: "x".into(),
                    branches: [BranchTarget::End, BranchTarget::Step(1)],
                },
            },
        ];
        let mut state = SessionState {
            thread_id: "t1".into(),
            messages: vec![],
            steps,
            system_prompt: "sys".into(),
            end_message: "bye".into(),
            max_turns: 1,
            current_step: NodeLabel::QuestionNode(2),
            current_step_messages: vec![],
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        executor.run_until_suspend(&mut state, checkpoints.as_ref(), &tx).await.unwrap();
        let outcome = executor.resume(&mut state, "answer", checkpoints.as_ref(), &tx).await.unwrap();
        assert!(!matches!(outcome, ExecOutcome::Completed { .. }));
        // branches[1] = step "1" (1-based) means 0-based index 0; the jump
        // must have reset current_step_messages rather than carrying over
        // step 2's transcript (instruction + generated question = 2, not
        // the 3 accumulated while step 2 was active).
        assert_eq!(state.current_step, NodeLabel::AnswerNode(0));
        assert_eq!(state.current_step_messages.len(), 2);
    }
}
