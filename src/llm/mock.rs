//! Scripted LLM client for tests
//!
//! Each method pops from its own response queue; call counts are tracked so
//! tests can assert how many LLM rounds a flow consumed. Kept out of
//! `#[cfg(test)]` so integration tests can drive full runs with it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{Contract, Task, TaskSummary};

use super::types::{Decomposition, DecomposedTaskSpec, GenerationContext, RegenerationContext};
use super::{LlmClient, LlmError};

#[derive(Default)]
struct Queues {
    decompositions: VecDeque<Result<Decomposition, LlmError>>,
    contracts: VecDeque<Result<Vec<Contract>, LlmError>>,
    generations: VecDeque<Result<String, LlmError>>,
    regenerations: VecDeque<Result<String, LlmError>>,
    summaries: VecDeque<Result<TaskSummary, LlmError>>,
    subtasks: VecDeque<Result<Vec<DecomposedTaskSpec>, LlmError>>,
}

/// Scripted mock LLM client
#[derive(Default)]
pub struct MockLlmClient {
    queues: Mutex<Queues>,
    decompose_calls: AtomicUsize,
    contract_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    regenerate_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
    split_calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_decomposition(&self, d: Decomposition) {
        self.queues.lock().decompositions.push_back(Ok(d));
    }

    pub fn queue_decomposition_error(&self, e: LlmError) {
        self.queues.lock().decompositions.push_back(Err(e));
    }

    pub fn queue_contracts(&self, contracts: Vec<Contract>) {
        self.queues.lock().contracts.push_back(Ok(contracts));
    }

    pub fn queue_generation(&self, source: impl Into<String>) {
        self.queues.lock().generations.push_back(Ok(source.into()));
    }

    pub fn queue_generation_error(&self, e: LlmError) {
        self.queues.lock().generations.push_back(Err(e));
    }

    pub fn queue_regeneration(&self, source: impl Into<String>) {
        self.queues.lock().regenerations.push_back(Ok(source.into()));
    }

    pub fn queue_summary(&self, summary: TaskSummary) {
        self.queues.lock().summaries.push_back(Ok(summary));
    }

    pub fn queue_subtasks(&self, tasks: Vec<DecomposedTaskSpec>) {
        self.queues.lock().subtasks.push_back(Ok(tasks));
    }

    pub fn queue_subtasks_error(&self, e: LlmError) {
        self.queues.lock().subtasks.push_back(Err(e));
    }

    pub fn decompose_calls(&self) -> usize {
        self.decompose_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn regenerate_calls(&self) -> usize {
        self.regenerate_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    pub fn split_calls(&self) -> usize {
        self.split_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn decompose(&self, _request: &str, _context: &str) -> Result<Decomposition, LlmError> {
        self.decompose_calls.fetch_add(1, Ordering::SeqCst);
        self.queues
            .lock()
            .decompositions
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted decomposition".to_string())))
    }

    async fn generate_contracts(&self, _request: &str, _tasks: &[Task]) -> Result<Vec<Contract>, LlmError> {
        self.contract_calls.fetch_add(1, Ordering::SeqCst);
        // Contract-first is optional; default to an empty catalog
        self.queues.lock().contracts.pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn generate(&self, _task: &Task, _context: &GenerationContext) -> Result<String, LlmError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.queues
            .lock()
            .generations
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted generation".to_string())))
    }

    async fn regenerate(&self, _task: &Task, _context: &RegenerationContext) -> Result<String, LlmError> {
        self.regenerate_calls.fetch_add(1, Ordering::SeqCst);
        self.queues
            .lock()
            .regenerations
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted regeneration".to_string())))
    }

    async fn summarize(&self, task: &Task, _source: &str) -> Result<TaskSummary, LlmError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.queues.lock().summaries.pop_front().unwrap_or_else(|| {
            Ok(TaskSummary {
                purpose: format!("Implements task {}", task.id),
                key_behaviors: Vec::new(),
                edge_cases: Vec::new(),
            })
        })
    }

    async fn decompose_complex(&self, _task: &Task, _max_lines: u32) -> Result<Vec<DecomposedTaskSpec>, LlmError> {
        self.split_calls.fetch_add(1, Ordering::SeqCst);
        self.queues
            .lock()
            .subtasks
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted subtasks".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_pops_in_order() {
        let mock = MockLlmClient::new();
        mock.queue_generation("first");
        mock.queue_generation("second");

        let task = Task::new("t", "x");
        let ctx = GenerationContext::default();
        assert_eq!(mock.generate(&task, &ctx).await.unwrap(), "first");
        assert_eq!(mock.generate(&task, &ctx).await.unwrap(), "second");
        assert_eq!(mock.generate_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_errors_when_exhausted() {
        let mock = MockLlmClient::new();
        let task = Task::new("t", "x");
        let result = mock.generate(&task, &GenerationContext::default()).await;
        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_mock_default_summary() {
        let mock = MockLlmClient::new();
        let task = Task::new("t9", "x");
        let summary = mock.summarize(&task, "code").await.unwrap();
        assert!(summary.purpose.contains("t9"));
    }

    #[tokio::test]
    async fn test_mock_scripted_error() {
        let mock = MockLlmClient::new();
        mock.queue_generation_error(LlmError::Empty);
        let task = Task::new("t", "x");
        let result = mock.generate(&task, &GenerationContext::default()).await;
        assert!(matches!(result, Err(LlmError::Empty)));
    }
}
