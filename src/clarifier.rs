//! Clarifier boundary
//!
//! User-interaction hook for vague task descriptions and plan review. The
//! prompt loop itself lives outside the orchestrator; non-interactive runs
//! use [`AutoApprove`].

use async_trait::async_trait;
use eyre::Result;

use crate::domain::Task;

/// Outcome of a plan review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewDecision {
    #[default]
    Accept,
    Abort,
}

/// Blocking user-interaction boundary
#[async_trait]
pub trait Clarifier: Send + Sync {
    /// Ask the user to disambiguate; the answer is appended to the task
    async fn ask(&self, context: &str, question: &str) -> Result<String>;

    /// Present the decomposed plan for approval before execution
    async fn review(&self, tasks: &[Task]) -> Result<ReviewDecision>;
}

/// Non-interactive clarifier: empty answers, every plan accepted
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl Clarifier for AutoApprove {
    async fn ask(&self, _context: &str, _question: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn review(&self, _tasks: &[Task]) -> Result<ReviewDecision> {
        Ok(ReviewDecision::Accept)
    }
}

/// Scripted clarifier for tests
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockClarifier {
        answers: Mutex<VecDeque<String>>,
        decision: Mutex<ReviewDecision>,
        ask_calls: AtomicUsize,
    }

    impl MockClarifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_answer(&self, answer: impl Into<String>) {
            self.answers.lock().push_back(answer.into());
        }

        pub fn set_decision(&self, decision: ReviewDecision) {
            *self.decision.lock() = decision;
        }

        pub fn ask_calls(&self) -> usize {
            self.ask_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Clarifier for MockClarifier {
        async fn ask(&self, _context: &str, _question: &str) -> Result<String> {
            self.ask_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers.lock().pop_front().unwrap_or_default())
        }

        async fn review(&self, _tasks: &[Task]) -> Result<ReviewDecision> {
            Ok(*self.decision.lock())
        }
    }
}
