//! Test helpers for interpreter tests
//!
//! A harness wires an engine with a short tick and a few probe commands:
//! - `record:text` appends `text` to the shared log
//! - `flaky:N` fails until its Nth attempt (counted in `attempts`)
//! - `fail:` always fails
//! - `sleep:MS` blocks for MS milliseconds
//! - `spawn:MS` async; sleeps MS milliseconds on its own thread, then records `spawned`

use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::interpreter::{
    Command, CommandError, Engine, ExecContext, Invocation, Properties, RequestContext,
};

pub const TEST_TICK: Duration = Duration::from_millis(10);

pub struct Harness {
    pub engine: Engine,
    pub log: Arc<Mutex<Vec<String>>>,
    pub attempts: Arc<AtomicUsize>,
}

impl Harness {
    pub fn logged(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Run `action` for a new request; returns the outcome and the request.
    pub fn run(&self, action: &str, params: HashMap<&str, JsonValue>) -> (bool, Arc<RequestContext>) {
        let request = Arc::new(RequestContext::new(to_map(params)));
        let ok = self.engine.execute_in(Arc::clone(&request), action);
        (ok, request)
    }
}

/// Build a harness whose properties hold `instructions`.
pub fn harness(instructions: &[(&str, &str)]) -> Harness {
    let log = Arc::new(Mutex::new(Vec::new()));
    let attempts = Arc::new(AtomicUsize::new(0));
    let properties = Arc::new(Properties::from_pairs(instructions.iter().copied()));

    let engine = Engine::builder()
        .properties(properties)
        .tick(TEST_TICK)
        .command("record", Record { log: Arc::clone(&log) })
        .command(
            "flaky",
            Flaky {
                attempts: Arc::clone(&attempts),
            },
        )
        .command("fail", Fail)
        .command("sleep", Sleep)
        .command("spawn", Spawn { log: Arc::clone(&log) })
        .build();

    Harness {
        engine,
        log,
        attempts,
    }
}

pub fn to_map(params: HashMap<&str, JsonValue>) -> Map<String, JsonValue> {
    params.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/* ===================== Probe commands ===================== */

struct Record {
    log: Arc<Mutex<Vec<String>>>,
}

struct RecordRun {
    log: Arc<Mutex<Vec<String>>>,
    text: String,
}

impl Command for Record {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        Ok(Box::new(RecordRun {
            log: Arc::clone(&self.log),
            text: payload.trim().to_string(),
        }))
    }
}

impl Invocation for RecordRun {
    fn run(&mut self, _ctx: &mut ExecContext) -> bool {
        self.log.lock().push(self.text.clone());
        true
    }
}

struct Flaky {
    attempts: Arc<AtomicUsize>,
}

struct FlakyRun {
    attempts: Arc<AtomicUsize>,
    succeed_on: usize,
}

impl Command for Flaky {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        let succeed_on = payload
            .trim()
            .parse()
            .map_err(|_| CommandError::Invalid(format!("flaky needs a number, got '{}'", payload)))?;
        Ok(Box::new(FlakyRun {
            attempts: Arc::clone(&self.attempts),
            succeed_on,
        }))
    }
}

impl Invocation for FlakyRun {
    fn run(&mut self, _ctx: &mut ExecContext) -> bool {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.succeed_on > 0 && attempt >= self.succeed_on
    }
}

struct Fail;

struct FailRun;

impl Command for Fail {
    fn init(&self, _payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        Ok(Box::new(FailRun))
    }
}

impl Invocation for FailRun {
    fn run(&mut self, _ctx: &mut ExecContext) -> bool {
        false
    }
}

struct Sleep;

struct SleepRun(Duration);

fn millis(payload: &str) -> Result<Duration, CommandError> {
    payload
        .trim()
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| CommandError::Invalid(format!("expected milliseconds, got '{}'", payload)))
}

impl Command for Sleep {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        Ok(Box::new(SleepRun(millis(payload)?)))
    }
}

impl Invocation for SleepRun {
    fn run(&mut self, _ctx: &mut ExecContext) -> bool {
        thread::sleep(self.0);
        true
    }
}

struct Spawn {
    log: Arc<Mutex<Vec<String>>>,
}

struct SpawnRun {
    log: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl Command for Spawn {
    fn init(&self, payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
        Ok(Box::new(SpawnRun {
            log: Arc::clone(&self.log),
            delay: millis(payload)?,
        }))
    }

    fn is_async(&self) -> bool {
        true
    }
}

impl Invocation for SpawnRun {
    fn run(&mut self, ctx: &mut ExecContext) -> bool {
        let Some(barrier) = ctx.barrier() else {
            return false;
        };
        let log = Arc::clone(&self.log);
        let delay = self.delay;
        barrier.register(thread::spawn(move || {
            thread::sleep(delay);
            log.lock().push("spawned".to_string());
            true
        }));
        true
    }
}
