//! The generate → validate → execute → repair loop.
//!
//! One submission drives a strictly sequential state machine: ask the
//! model for code, extract the fenced block, run the safety and syntax
//! gates, execute against the host, and on any failure feed the error
//! back to the model as a repair prompt — at most [`MAX_ATTEMPTS`] model
//! invocations in total.

use crate::backend::ModelClient;
use crate::error::GenError;
use crate::extract::extract_python_block;
use crate::host::ScriptHost;
use crate::safety::SafetyPolicy;
use crate::syntax::check_python;

/// Total model invocations allowed per submission, counting the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Instruction preamble prepended to every user prompt.
pub const INSTRUCTION_PREAMBLE: &str = "coding Blender python program using bpy, basic grammar \
without Explanation, \"#\" inline comments, complicated grammar like lambda and function under \
user request. do not delete the previous objects. user request is";

/// Final state of one submission.
#[derive(Debug)]
pub enum Outcome {
    /// Generated code ran against the host without raising.
    Success { attempts: u32 },
    /// The retry budget ran out, or a configuration error ended the
    /// submission early. No further model calls are made.
    Failed { attempts: u32, error: GenError },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts } | Outcome::Failed { attempts, .. } => *attempts,
        }
    }

    /// Short status line for the user-facing surface. Per-attempt detail
    /// stays on the developer console.
    pub fn message(&self) -> String {
        match self {
            Outcome::Success { .. } => "Prompt executed successfully.".to_string(),
            Outcome::Failed { error: GenError::Config(detail), .. } => detail.clone(),
            Outcome::Failed { .. } => {
                "Prompt execution failed. Check the console output for details.".to_string()
            }
        }
    }
}

/// Drives one submission at a time. A new call to [`Generator::run`]
/// starts a fresh attempt counter; submissions never overlap.
pub struct Generator<C, H> {
    client: C,
    host: H,
    policy: SafetyPolicy,
    check_only: bool,
}

impl<C: ModelClient, H: ScriptHost> Generator<C, H> {
    pub fn new(client: C, host: H) -> Self {
        Self {
            client,
            host,
            policy: SafetyPolicy::default(),
            check_only: false,
        }
    }

    /// Validate candidates without executing them.
    pub fn check_only(mut self) -> Self {
        self.check_only = true;
        self
    }

    /// Replace the default import denylist.
    pub fn with_policy(mut self, policy: SafetyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one submission to completion.
    ///
    /// Blocks the caller (cooperatively) until the generated code executes
    /// cleanly or the attempt budget is exhausted. Failures below this
    /// boundary never propagate; they become the returned outcome.
    pub async fn run(&mut self, user_prompt: &str) -> Outcome {
        let mut prompt = format!("{}: {}", INSTRUCTION_PREAMBLE, user_prompt);
        let mut last_code: Option<String> = None;
        let mut attempts = 0;

        loop {
            attempts += 1;
            eprintln!("  Attempt {}/{}", attempts, MAX_ATTEMPTS);

            let error = match self.attempt(&prompt, &mut last_code).await {
                Ok(()) => return Outcome::Success { attempts },
                Err(error) => error,
            };
            eprintln!("  Error: {}", error);

            if error.is_fatal() || attempts >= MAX_ATTEMPTS {
                return Outcome::Failed { attempts, error };
            }

            prompt = repair_prompt(&error, last_code.as_deref());
        }
    }

    /// One pass through the state machine: respond → extract → validate →
    /// execute.
    async fn attempt(&mut self, prompt: &str, last_code: &mut Option<String>) -> Result<(), GenError> {
        let response = self.client.invoke(prompt).await?;
        if response.trim().is_empty() {
            return Err(GenError::Transport("model returned an empty response".to_string()));
        }

        let code = extract_python_block(&response).ok_or(GenError::Extraction)?;
        // Remember the candidate so a failed gate or execution can show it
        // to the model in the repair prompt.
        *last_code = Some(code.clone());

        self.policy.check(&code)?;
        check_python(&code)?;

        if self.check_only {
            eprintln!("  Check mode: code passed validation, skipping execution.");
            return Ok(());
        }

        self.host.run_script(&code).map_err(GenError::Execution)?;
        eprintln!("  Code executed successfully.");
        Ok(())
    }
}

/// Follow-up instruction containing the prior failure and the code that
/// produced it. When no candidate was ever produced (transport or
/// extraction failure), say so instead of referencing stale code.
fn repair_prompt(error: &GenError, last_code: Option<&str>) -> String {
    match last_code {
        Some(code) => format!("Fix the error {} in {}", error, code),
        None => format!("Fix the error {} (no code was generated)", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays a scripted sequence of backend responses and records every
    /// prompt it was sent.
    struct ScriptedClient {
        responses: RefCell<VecDeque<Result<String, GenError>>>,
        prompts: RefCell<Vec<String>>,
    }

    impl ScriptedClient {
        fn new<I>(responses: I) -> Self
        where
            I: IntoIterator<Item = Result<String, GenError>>,
        {
            Self {
                responses: RefCell::new(responses.into_iter().collect()),
                prompts: RefCell::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.borrow().len()
        }

        fn prompt(&self, index: usize) -> String {
            self.prompts.borrow()[index].clone()
        }

        fn remaining(&self) -> usize {
            self.responses.borrow().len()
        }
    }

    impl ModelClient for &ScriptedClient {
        async fn invoke(&self, prompt: &str) -> Result<String, GenError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.responses
                .borrow_mut()
                .pop_front()
                .expect("model invoked more times than scripted")
        }
    }

    /// Records executed scripts and replays scripted execution results.
    #[derive(Default)]
    struct RecordingHost {
        scripts: Vec<String>,
        results: VecDeque<Result<(), String>>,
    }

    impl RecordingHost {
        fn failing_once(message: &str) -> Self {
            Self {
                scripts: Vec::new(),
                results: VecDeque::from([Err(message.to_string()), Ok(())]),
            }
        }
    }

    impl ScriptHost for &mut RecordingHost {
        fn run_script(&mut self, code: &str) -> Result<(), String> {
            self.scripts.push(code.to_string());
            self.results.pop_front().unwrap_or(Ok(()))
        }
    }

    fn fenced(code: &str) -> Result<String, GenError> {
        Ok(format!("Sure!\n```python\n{}\n```\n", code))
    }

    const CUBE_CODE: &str = "import bpy\nbpy.ops.mesh.primitive_cube_add(location=(0, 0, 0))";

    #[tokio::test]
    async fn test_valid_code_succeeds_on_first_attempt() {
        // Scenario: "draw a red cube at origin" with a well-behaved model.
        let client = ScriptedClient::new([fenced(CUBE_CODE)]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host)
            .run("draw a red cube at origin")
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(host.scripts, vec![CUBE_CODE.to_string()]);
        // The first prompt carries the instruction preamble and user text.
        assert!(client.prompt(0).contains("draw a red cube at origin"));
        assert!(client.prompt(0).starts_with(INSTRUCTION_PREAMBLE));
    }

    #[tokio::test]
    async fn test_deterministic_backend_is_idempotent() {
        for _ in 0..3 {
            let client = ScriptedClient::new([fenced(CUBE_CODE)]);
            let mut host = RecordingHost::default();
            let outcome = Generator::new(&client, &mut host).run("a cube").await;
            assert!(outcome.is_success());
            assert_eq!(outcome.attempts(), 1);
        }
    }

    #[tokio::test]
    async fn test_no_fence_retries_until_budget_exhausted() {
        // Scenario: prose-only responses, three times in a row.
        let client = ScriptedClient::new([
            Ok("I cannot help with that.".to_string()),
            Ok("Still no code.".to_string()),
            Ok("Sorry.".to_string()),
        ]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), MAX_ATTEMPTS);
        assert_eq!(client.calls(), MAX_ATTEMPTS as usize);
        assert!(host.scripts.is_empty(), "nothing should ever execute");
        match outcome {
            Outcome::Failed { error: GenError::Extraction, .. } => {}
            other => panic!("expected an extraction failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_budget_is_never_exceeded() {
        // A fourth scripted response must never be consumed.
        let client = ScriptedClient::new([
            Ok("no code".to_string()),
            Ok("no code".to_string()),
            Ok("no code".to_string()),
            fenced(CUBE_CODE),
        ]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(!outcome.is_success());
        assert_eq!(client.calls(), MAX_ATTEMPTS as usize);
        assert_eq!(client.remaining(), 1);
    }

    #[tokio::test]
    async fn test_execution_error_feeds_repair_prompt() {
        // Scenario: first candidate raises at runtime, the repaired
        // second candidate runs cleanly.
        let broken = "import bpy\nbpy.ops.mesh.primitive_cub_add()";
        let client = ScriptedClient::new([fenced(broken), fenced(CUBE_CODE)]);
        let mut host = RecordingHost::failing_once("NameError: name 'cub' is not defined");

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(host.scripts.len(), 2);

        let repair = client.prompt(1);
        assert!(repair.starts_with("Fix the error"));
        assert!(repair.contains("NameError: name 'cub' is not defined"));
        assert!(repair.contains(broken));
    }

    #[tokio::test]
    async fn test_unsafe_code_is_never_executed() {
        // Scenario: `import subprocess` must be rejected before parse or
        // execution, then retried.
        let client = ScriptedClient::new([
            fenced("import subprocess\nsubprocess.run(['ls'])"),
            fenced(CUBE_CODE),
        ]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(host.scripts, vec![CUBE_CODE.to_string()]);

        let repair = client.prompt(1);
        assert!(repair.contains("unsafe"));
        assert!(repair.contains("import subprocess"));
    }

    #[tokio::test]
    async fn test_syntax_error_is_never_executed() {
        let client = ScriptedClient::new([
            fenced("def broken(:\n    pass"),
            fenced(CUBE_CODE),
        ]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(host.scripts, vec![CUBE_CODE.to_string()]);
    }

    #[tokio::test]
    async fn test_config_error_is_fatal() {
        // Scenario: missing credentials end the submission immediately.
        let client = ScriptedClient::new([
            Err(GenError::Config("OpenAI API key is not configured".to_string())),
            fenced(CUBE_CODE),
        ]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(client.calls(), 1, "no retries after a config error");
        assert!(host.scripts.is_empty());
        assert!(outcome.message().contains("API key"));
    }

    #[tokio::test]
    async fn test_repair_prompt_without_candidate_says_so() {
        // Extraction failed, so there is no code to reference.
        let client = ScriptedClient::new([
            Ok("no fence here".to_string()),
            fenced(CUBE_CODE),
        ]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(outcome.is_success());
        let repair = client.prompt(1);
        assert!(repair.contains("no code was generated"));
    }

    #[tokio::test]
    async fn test_empty_response_skips_extraction_and_retries() {
        let client = ScriptedClient::new([Ok("   \n".to_string()), fenced(CUBE_CODE)]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        let repair = client.prompt(1);
        assert!(repair.contains("empty response"));
    }

    #[tokio::test]
    async fn test_stale_candidate_is_reused_for_gate_failures() {
        // The second attempt fails extraction; the repair prompt falls
        // back to the last known candidate from the first attempt.
        let broken = "import bpy\nbpy.ops.mesh.primitive_cub_add()";
        let client = ScriptedClient::new([
            fenced(broken),
            Ok("no fence".to_string()),
            fenced(CUBE_CODE),
        ]);
        let mut host = RecordingHost::failing_once("NameError");

        let outcome = Generator::new(&client, &mut host).run("a cube").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        // Second repair prompt still references the only candidate seen.
        assert!(client.prompt(2).contains(broken));
    }

    #[tokio::test]
    async fn test_check_only_skips_execution() {
        let client = ScriptedClient::new([fenced(CUBE_CODE)]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host)
            .check_only()
            .run("a cube")
            .await;

        assert!(outcome.is_success());
        assert!(host.scripts.is_empty());
    }

    #[tokio::test]
    async fn test_custom_policy_is_applied() {
        let client = ScriptedClient::new([fenced(CUBE_CODE), fenced("x = 1")]);
        let mut host = RecordingHost::default();

        let outcome = Generator::new(&client, &mut host)
            .with_policy(SafetyPolicy::with_denied(["bpy"]))
            .run("a cube")
            .await;

        // The bpy import is now denied; the plain assignment passes.
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(host.scripts, vec!["x = 1".to_string()]);
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            Outcome::Success { attempts: 1 }.message(),
            "Prompt executed successfully."
        );
        let failed = Outcome::Failed {
            attempts: 3,
            error: GenError::Extraction,
        };
        assert!(failed.message().contains("failed"));
    }
}
