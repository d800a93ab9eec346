//! Engine
//!
//! The assembled interpreter: registry, providers, evaluator and the
//! properties store, plus the entry points a host uses to run actions.

use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{ExecContext, JoinBarrier, RequestContext};
use super::exec_loop::{dispatch, run_cycle};
use super::expressions::{Evaluator, ExprEvaluator};
use super::frames::{push_frame, ReturnSpec};
use super::instruction::Instruction;
use super::properties::Properties;
use super::providers::{Providers, StorageProvider};
use super::registry::{Command, Registry};

/// Variable receiving the result of a top-level action.
pub const ACTION_RESULT: &str = "ACTION_RESULT";

/// Prefix of actions reachable through [`Engine::fire_action`].
pub const ACTION_PREFIX: &str = "ACTION_";

/// Default length of one timing unit.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/* ===================== Builder ===================== */

pub struct EngineBuilder {
    registry: Registry,
    providers: Providers,
    evaluator: Option<Box<dyn Evaluator>>,
    properties: Option<Arc<Properties>>,
    tick: Duration,
}

impl EngineBuilder {
    /// Built-in commands, standard providers, default evaluator, 1s tick.
    pub fn new() -> Self {
        Self {
            registry: Registry::with_builtins(),
            providers: Providers::standard(),
            evaluator: None,
            properties: None,
            tick: DEFAULT_TICK,
        }
    }

    /// Replace the whole registry.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn command(mut self, key: &str, command: impl Command + 'static) -> Self {
        self.registry.register(key, command);
        self
    }

    pub fn provider(mut self, name: &str, provider: impl StorageProvider + 'static) -> Self {
        self.providers.register(name, provider);
        self
    }

    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    pub fn properties(mut self, properties: Arc<Properties>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Length of one idle/pause/total unit.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                providers: self.providers,
                evaluator: self.evaluator.unwrap_or_else(|| Box::new(ExprEvaluator)),
                properties: self.properties.unwrap_or_default(),
                tick: self.tick,
            }),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Engine ===================== */

/// How a fired action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// No `ACTION_<name>_1` instruction exists
    NotImplemented,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::NotImplemented => write!(f, "not implemented"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// What a host gets back from [`Engine::fire_action`].
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub request_id: Uuid,
    pub outcome: Outcome,
    /// `ACTION_RESULT` of the request-global scope
    pub result: Option<JsonValue>,
    /// Error recorded on the request (error provider, aborts)
    pub error: Option<String>,
}

/// A problem found by [`Engine::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIssue {
    pub key: String,
    pub message: String,
}

impl fmt::Display for CheckIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

struct EngineInner {
    registry: Registry,
    providers: Providers,
    evaluator: Box<dyn Evaluator>,
    properties: Arc<Properties>,
    tick: Duration,
}

/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn providers(&self) -> &Providers {
        &self.inner.providers
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.inner.evaluator.as_ref()
    }

    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    pub fn shared_properties(&self) -> Arc<Properties> {
        Arc::clone(&self.inner.properties)
    }

    pub fn tick(&self) -> Duration {
        self.inner.tick
    }

    /// Whether `action` has a first instruction.
    pub fn has_action(&self, action: &str) -> bool {
        !self
            .properties()
            .get_text(&format!("{}_1", action))
            .trim()
            .is_empty()
    }

    /// Run `action` as the top-level sequence of a new request seeded with `params`.
    pub fn execute_sequence(&self, action: &str, params: Map<String, JsonValue>) -> bool {
        self.execute_in(Arc::new(RequestContext::new(params)), action)
    }

    /// Run `action` as the top-level sequence of an existing request.
    ///
    /// Its `ACTION_RESULT` lands in the request-global scope.
    pub fn execute_in(&self, request: Arc<RequestContext>, action: &str) -> bool {
        let mut ctx = ExecContext::new(self.clone(), request);
        push_frame(&mut ctx, action, ReturnSpec::parse(ACTION_RESULT), Map::new());
        let ok = run_cycle(&mut ctx, 0);
        if !ok {
            warn!(
                action,
                request = %ctx.request().id(),
                depth = ctx.depth(),
                "Sequence failed"
            );
        }
        ok
    }

    /// Run one decorated instruction outside any request.
    ///
    /// Default-level saves go to the properties store.
    pub fn execute_command(&self, text: &str) -> bool {
        let request = Arc::new(RequestContext::detached());
        let mut ctx = ExecContext::new(self.clone(), Arc::clone(&request));

        let expanded = {
            let scopes = request.scopes();
            let view = scopes.view(request.root(), self.properties());
            self.evaluator().expand(text, &view)
        };
        let instruction = match expanded.map(|t| Instruction::parse(&t)) {
            Ok(Ok(instruction)) => instruction,
            Ok(Err(e)) => {
                error!(command = text, error = %e, "Malformed instruction");
                return false;
            }
            Err(e) => {
                error!(command = text, error = %e, "Cannot expand instruction");
                return false;
            }
        };
        let Some(registration) = self.registry().get(&instruction.command) else {
            error!(command = %instruction.command, "Unknown command");
            return false;
        };

        let barrier = JoinBarrier::new();
        ctx.replace_barrier(Some(barrier.clone()));
        let mut ok = dispatch(&mut ctx, &registration, &instruction, text);
        if ok && ctx.depth() > 0 {
            ok = run_cycle(&mut ctx, 0);
        }
        if barrier.join() > 0 {
            warn!(command = text, "Background work of command failed");
        }
        ok && !request.is_aborted()
    }

    /// Run `ACTION_<name>` for a fresh request seeded with `params`.
    pub fn fire_action(&self, name: &str, params: Map<String, JsonValue>) -> ActionReport {
        self.fire_action_in(Arc::new(RequestContext::new(params)), name)
    }

    pub fn fire_action_in(&self, request: Arc<RequestContext>, name: &str) -> ActionReport {
        let action = format!("{}{}", ACTION_PREFIX, name);
        let outcome = if !self.has_action(&action) {
            info!(action = %action, "Action is not implemented");
            Outcome::NotImplemented
        } else if self.execute_in(Arc::clone(&request), &action) {
            Outcome::Completed
        } else {
            Outcome::Failed
        };
        debug!(
            action = %action,
            request = %request.id(),
            %outcome,
            elapsed_ms = request.elapsed().num_milliseconds(),
            "Action finished"
        );
        ActionReport {
            request_id: request.id(),
            outcome,
            result: request.global(ACTION_RESULT),
            error: request.error(),
        }
    }

    /// [`fire_action`](Self::fire_action) on the blocking thread pool.
    pub async fn fire_action_async(
        &self,
        name: &str,
        params: Map<String, JsonValue>,
    ) -> Result<ActionReport, tokio::task::JoinError> {
        let engine = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || engine.fire_action(&name, params)).await
    }

    /// Decode every instruction of every action in the properties store and
    /// report bad decorations and unknown commands. Instructions whose
    /// command prefix comes from a placeholder are skipped.
    pub fn check(&self) -> Vec<CheckIssue> {
        let mut issues = Vec::new();
        for action in self.properties().action_names() {
            for index in 1.. {
                let key = format!("{}_{}", action, index);
                let text = self.properties().get_text(&key);
                let text = text.trim();
                if text.is_empty() {
                    break;
                }
                if let Some(issue) = self.check_instruction(&key, text) {
                    issues.push(issue);
                }
            }
        }
        issues
    }

    fn check_instruction(&self, key: &str, text: &str) -> Option<CheckIssue> {
        if let Some((head, _)) = text.split_once("{{") {
            if !head.contains(':') {
                return None;
            }
        }
        match Instruction::parse(text) {
            Err(e) => Some(CheckIssue {
                key: key.to_string(),
                message: e.to_string(),
            }),
            Ok(instruction) if !self.registry().contains(&instruction.command) => Some(CheckIssue {
                key: key.to_string(),
                message: format!("unknown command '{}'", instruction.command),
            }),
            Ok(_) => None,
        }
    }
}
