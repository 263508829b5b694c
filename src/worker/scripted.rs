//! Deterministic worker used by the test suite and for offline dry runs.
//!
//! Responses are scripted per task kind as a queue; once a queue drains,
//! the task's fallback response (if any) answers every further call. A
//! call log records every evaluation for assertions.

use crate::errors::WorkerError;
use crate::worker::{TaskKind, Worker};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Value(Value),
    Error(WorkerError),
    /// Sleep before answering; lets tests exercise stage timeouts.
    Delay(Duration, Value),
}

#[derive(Default)]
pub struct ScriptedWorker {
    queues: Mutex<HashMap<TaskKind, VecDeque<ScriptedResponse>>>,
    fallbacks: Mutex<HashMap<TaskKind, ScriptedResponse>>,
    calls: Mutex<Vec<(TaskKind, Value)>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for a task kind.
    pub fn respond(&self, task: TaskKind, value: Value) -> &Self {
        self.push(task, ScriptedResponse::Value(value));
        self
    }

    /// Queue one failing response for a task kind.
    pub fn fail(&self, task: TaskKind, error: WorkerError) -> &Self {
        self.push(task, ScriptedResponse::Error(error));
        self
    }

    /// Queue a response delivered after a delay.
    pub fn respond_after(&self, task: TaskKind, delay: Duration, value: Value) -> &Self {
        self.push(task, ScriptedResponse::Delay(delay, value));
        self
    }

    /// Answer every call for a task kind once its queue is drained.
    pub fn respond_always(&self, task: TaskKind, value: Value) -> &Self {
        self.fallbacks
            .lock()
            .unwrap()
            .insert(task, ScriptedResponse::Value(value));
        self
    }

    fn push(&self, task: TaskKind, response: ScriptedResponse) {
        self.queues
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(response);
    }

    /// Every evaluation observed so far, in order.
    pub fn calls(&self) -> Vec<(TaskKind, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of evaluations of one task kind.
    pub fn call_count(&self, task: TaskKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == task)
            .count()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn evaluate(&self, task: TaskKind, input: Value) -> Result<Value, WorkerError> {
        self.calls.lock().unwrap().push((task, input));

        let response = {
            let mut queues = self.queues.lock().unwrap();
            match queues.get_mut(&task).and_then(|q| q.pop_front()) {
                Some(response) => Some(response),
                None => self.fallbacks.lock().unwrap().get(&task).cloned(),
            }
        };

        match response {
            Some(ScriptedResponse::Value(value)) => Ok(value),
            Some(ScriptedResponse::Error(error)) => Err(error),
            Some(ScriptedResponse::Delay(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            None => Err(WorkerError::Task(format!(
                "no scripted response for task '{}'",
                task
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_responses_are_consumed_in_order() {
        let worker = ScriptedWorker::new();
        worker.respond(TaskKind::StyleCheck, json!({"score": 50}));
        worker.respond(TaskKind::StyleCheck, json!({"score": 90}));

        let first = worker.evaluate(TaskKind::StyleCheck, json!({})).await.unwrap();
        let second = worker.evaluate(TaskKind::StyleCheck, json!({})).await.unwrap();
        assert_eq!(first["score"], 50);
        assert_eq!(second["score"], 90);
    }

    #[tokio::test]
    async fn test_fallback_answers_after_queue_drains() {
        let worker = ScriptedWorker::new();
        worker.respond_always(TaskKind::TestRun, json!({"passed": 1}));

        for _ in 0..3 {
            let result = worker.evaluate(TaskKind::TestRun, json!({})).await.unwrap();
            assert_eq!(result["passed"], 1);
        }
        assert_eq!(worker.call_count(TaskKind::TestRun), 3);
    }

    #[tokio::test]
    async fn test_unscripted_task_fails() {
        let worker = ScriptedWorker::new();
        let err = worker
            .evaluate(TaskKind::FixGeneration, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Task(_)));
    }

    #[tokio::test]
    async fn test_scripted_error_is_returned() {
        let worker = ScriptedWorker::new();
        worker.fail(TaskKind::TestRun, WorkerError::Timeout);
        let err = worker.evaluate(TaskKind::TestRun, json!({})).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout));
    }

    #[tokio::test]
    async fn test_call_log_records_inputs() {
        let worker = ScriptedWorker::new();
        worker.respond(TaskKind::StyleCheck, json!({}));
        worker
            .evaluate(TaskKind::StyleCheck, json!({"code": "x = 1"}))
            .await
            .unwrap();
        let calls = worker.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, TaskKind::StyleCheck);
        assert_eq!(calls[0].1["code"], "x = 1");
    }
}
