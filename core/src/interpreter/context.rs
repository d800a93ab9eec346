//! Request and execution context
//!
//! [`RequestContext`] is shared by every thread working on one request: the
//! scope arena, the session, the recorded error and the abort flag.
//! [`ExecContext`] belongs to one thread of control and owns its frame stack.
//! Forking copies the frame stack; the arena stays shared behind its lock.
//! Every frame an [`ExecContext`] holds keeps its scope alive until the frame
//! is popped or the context is dropped.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use uuid::Uuid;

use super::engine::Engine;
use super::errors::EvalError;
use super::frames::Frame;
use super::scope::{ScopeArena, ScopeId};

/* ===================== Session ===================== */

/// Per-client values that outlive a single request.
#[derive(Debug, Default)]
pub struct Session {
    id: String,
    values: DashMap<String, JsonValue>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn set(&self, key: &str, value: JsonValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<JsonValue> {
        self.values.remove(key).map(|(_, v)| v)
    }
}

/* ===================== Request ===================== */

pub struct RequestContext {
    id: Uuid,
    started_at: DateTime<Utc>,
    scopes: Mutex<ScopeArena>,
    root: ScopeId,
    session: Option<Arc<Session>>,
    error: Mutex<Option<String>>,
    aborted: AtomicBool,
    detached: bool,
}

impl RequestContext {
    /// A request whose global scope is seeded with `params`.
    pub fn new(params: Map<String, JsonValue>) -> Self {
        Self::build(params, false)
    }

    /// A context with no active request: default saves go to the properties store.
    pub fn detached() -> Self {
        Self::build(Map::new(), true)
    }

    fn build(params: Map<String, JsonValue>, detached: bool) -> Self {
        let mut arena = ScopeArena::new();
        let root = arena.alloc(None, params);
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            scopes: Mutex::new(arena),
            root,
            session: None,
            error: Mutex::new(None),
            aborted: AtomicBool::new(false),
            detached,
        }
    }

    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time since the request was created.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Lock the scope arena. Keep the guard short-lived.
    pub fn scopes(&self) -> MutexGuard<'_, ScopeArena> {
        self.scopes.lock()
    }

    /// The request-global scope.
    pub fn root(&self) -> ScopeId {
        self.root
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Value of a variable in the request-global scope.
    pub fn global(&self, name: &str) -> Option<JsonValue> {
        self.scopes().get_local(self.root, name)
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *self.error.lock() = Some(message.into());
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Record `message` and stop every cycle working on this request.
    pub fn abort(&self, message: impl Into<String>) {
        self.record_error(message);
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/* ===================== Join barrier ===================== */

/// Forked work started by one cycle; joined before the cycle completes.
#[derive(Clone, Default)]
pub struct JoinBarrier {
    handles: Arc<Mutex<Vec<JoinHandle<bool>>>>,
}

impl JoinBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: JoinHandle<bool>) {
        self.handles.lock().push(handle);
    }

    pub fn pending(&self) -> usize {
        self.handles.lock().len()
    }

    /// Wait for every registered thread, including ones registered while
    /// waiting. Returns how many of them failed.
    pub fn join(&self) -> usize {
        let mut failed = 0;
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                return failed;
            }
            for handle in batch {
                match handle.join() {
                    Ok(true) => {}
                    Ok(false) => failed += 1,
                    Err(_) => {
                        tracing::error!("Forked instruction panicked");
                        failed += 1;
                    }
                }
            }
        }
    }
}

/* ===================== Execution context ===================== */

/// One thread of control working on a request.
pub struct ExecContext {
    engine: Engine,
    request: Arc<RequestContext>,
    pub(crate) frames: Vec<Frame>,
    barrier: Option<JoinBarrier>,
    break_at: Option<usize>,
}

impl ExecContext {
    pub fn new(engine: Engine, request: Arc<RequestContext>) -> Self {
        Self {
            engine,
            request,
            frames: Vec::new(),
            barrier: None,
            break_at: None,
        }
    }

    /// A copy for a forked thread: same request, private frame stack.
    ///
    /// The copy holds its own reference on every inherited scope, so the
    /// parent may return from those frames while the fork still runs.
    pub fn fork(&self) -> Self {
        let mut frames = self.frames.clone();
        {
            let mut scopes = self.request.scopes();
            for frame in &mut frames {
                scopes.retain(frame.scope);
                frame.owns_scope = true;
            }
        }
        Self {
            engine: self.engine.clone(),
            request: Arc::clone(&self.request),
            frames,
            barrier: None,
            break_at: None,
        }
    }

    /// Pop every frame above `level`, releasing the scopes they own.
    pub(crate) fn release_frames(&mut self, level: usize) {
        if self.frames.len() <= level {
            return;
        }
        let dropped = self.frames.split_off(level);
        let mut scopes = self.request.scopes();
        for frame in dropped.iter().rev().filter(|f| f.owns_scope) {
            scopes.release(frame.scope);
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn request(&self) -> &Arc<RequestContext> {
        &self.request
    }

    /// Current level; `-1` when no frame is active.
    pub fn level(&self) -> i64 {
        self.frames.len() as i64 - 1
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn top_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Scope of the active frame, or the request-global scope.
    pub fn current_scope(&self) -> ScopeId {
        self.frames
            .last()
            .map(|f| f.scope)
            .unwrap_or_else(|| self.request.root())
    }

    /// Join barrier of the innermost running cycle.
    pub fn barrier(&self) -> Option<&JoinBarrier> {
        self.barrier.as_ref()
    }

    pub(crate) fn replace_barrier(&mut self, barrier: Option<JoinBarrier>) -> Option<JoinBarrier> {
        std::mem::replace(&mut self.barrier, barrier)
    }

    pub(crate) fn request_break(&mut self, loop_index: usize) {
        self.break_at = Some(loop_index);
    }

    /// Consume a pending break aimed at the loop frame at `loop_index`.
    pub(crate) fn take_break(&mut self, loop_index: usize) -> bool {
        if self.break_at == Some(loop_index) {
            self.break_at = None;
            true
        } else {
            false
        }
    }

    /// Variable lookup through the active scope chain, then the properties.
    pub fn lookup(&self, name: &str) -> Option<JsonValue> {
        let scope = self.current_scope();
        self.request
            .scopes()
            .get(scope, name)
            .or_else(|| self.engine.properties().get(name))
    }

    /// Expand `{{ }}` placeholders against the active scope.
    pub fn expand(&self, text: &str) -> Result<String, EvalError> {
        let scopes = self.request.scopes();
        let view = scopes.view(self.current_scope(), self.engine.properties());
        self.engine.evaluator().expand(text, &view)
    }

    pub fn eval_boolean(&self, expr: &str) -> Result<bool, EvalError> {
        self.eval_boolean_in(self.current_scope(), expr)
    }

    pub fn eval_boolean_in(&self, scope: ScopeId, expr: &str) -> Result<bool, EvalError> {
        let scopes = self.request.scopes();
        let view = scopes.view(scope, self.engine.properties());
        self.engine.evaluator().eval_boolean(expr, &view)
    }

    pub fn eval_any(&self, expr: &str) -> Result<JsonValue, EvalError> {
        let scopes = self.request.scopes();
        let view = scopes.view(self.current_scope(), self.engine.properties());
        self.engine.evaluator().eval_any(expr, &view)
    }
}

impl Drop for ExecContext {
    fn drop(&mut self) {
        self.release_frames(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::frames::{push_frame, ReturnSpec};
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_abort_records_error() {
        let request = RequestContext::new(Map::new());
        assert!(!request.is_aborted());
        request.abort("backend down");
        assert!(request.is_aborted());
        assert!(request.elapsed() >= chrono::Duration::zero());
        assert_eq!(request.error().as_deref(), Some("backend down"));
    }

    #[test]
    fn test_root_scope_seeded_with_params() {
        let mut params = Map::new();
        params.insert("user".into(), json!("ann"));
        let request = RequestContext::new(params);
        assert_eq!(request.global("user"), Some(json!("ann")));
        assert!(!request.is_detached());
        assert!(RequestContext::detached().is_detached());
    }

    #[test]
    fn test_fork_keeps_inherited_scopes_alive() {
        let request = Arc::new(RequestContext::new(Map::new()));
        let mut ctx = ExecContext::new(Engine::builder().build(), Arc::clone(&request));
        push_frame(&mut ctx, "MAIN", ReturnSpec::ignore(), Map::new());
        let scope = ctx.current_scope();
        request.scopes().set(scope, "x", json!(1));

        let forked = ctx.fork();
        drop(ctx);
        assert_eq!(request.scopes().get(scope, "x"), Some(json!(1)));

        drop(forked);
        assert_eq!(request.scopes().len(), 1);
        assert_eq!(request.scopes().get(scope, "x"), None);
    }

    #[test]
    fn test_barrier_counts_failures() {
        let barrier = JoinBarrier::new();
        barrier.register(thread::spawn(|| true));
        barrier.register(thread::spawn(|| false));
        assert_eq!(barrier.pending(), 2);
        assert_eq!(barrier.join(), 1);
        assert_eq!(barrier.pending(), 0);
    }
}
