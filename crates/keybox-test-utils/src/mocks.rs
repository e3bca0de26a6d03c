//! Mock implementations for testing.
//!
//! Provides test doubles for the command execution layer.

use async_trait::async_trait;
use keybox_sandbox::{CommandResult, CommandRunner, CommandSpec, SandboxResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A mock [`CommandRunner`] that records every spec and replays results.
///
/// Results are looked up in order: a queued result, then a response
/// configured for the argv prefix, then the default (empty success).
///
/// # Example
///
/// ```rust
/// use keybox_test_utils::mocks::ScriptedRunner;
/// use keybox_sandbox::CommandResult;
///
/// let runner = ScriptedRunner::new()
///     .with_response(&["inspect"], CommandResult::success("true\n"))
///     .then(CommandResult::failure(1, "boom"));
///
/// assert_eq!(runner.call_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    /// Recorded command specs.
    calls: Arc<Mutex<Vec<CommandSpec>>>,
    /// Results returned in order before anything else.
    queue: Arc<Mutex<VecDeque<CommandResult>>>,
    /// Configured responses (argv prefix joined by spaces -> result).
    responses: Arc<Mutex<HashMap<String, CommandResult>>>,
    /// Default response when nothing else matches.
    default_response: Arc<Mutex<Option<CommandResult>>>,
}

impl ScriptedRunner {
    /// Create a new scripted runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next unmatched call.
    pub fn then(self, result: CommandResult) -> Self {
        self.queue.lock().unwrap().push_back(result);
        self
    }

    /// Configure a response for calls whose args start with `prefix`.
    pub fn with_response(self, prefix: &[&str], result: CommandResult) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(prefix.join(" "), result);
        self
    }

    /// Configure a default response for unmatched commands.
    pub fn with_default_response(self, result: CommandResult) -> Self {
        *self.default_response.lock().unwrap() = Some(result);
        self
    }

    /// Get all recorded command specs.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Get the number of commands run.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Get the last command spec.
    pub fn last_call(&self) -> Option<CommandSpec> {
        self.calls.lock().unwrap().last().cloned()
    }

    fn respond(&self, spec: &CommandSpec) -> CommandResult {
        if let Some(result) = self.queue.lock().unwrap().pop_front() {
            return result;
        }

        let joined = spec.args.join(" ");
        let responses = self.responses.lock().unwrap();
        let best = responses
            .iter()
            .filter(|(prefix, _)| joined.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        if let Some((_, result)) = best {
            return result.clone();
        }
        drop(responses);

        self.default_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| CommandResult::success(""))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec) -> SandboxResult<CommandResult> {
        let result = self.respond(&spec);
        self.calls.lock().unwrap().push(spec);
        Ok(result)
    }
}
