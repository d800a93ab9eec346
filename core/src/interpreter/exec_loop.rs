//! Core execution loop
//!
//! [`run_cycle`] drives the frame stack from a given level upward: fetch the
//! next instruction of the active frame, expand it, decode its decorations,
//! and dispatch it through the registry (inline or on a forked thread). The
//! cycle ends when the stack drains below its starting level.
//!
//! ## Function Organization
//! 1. run_cycle() - Cycle driver, owns the join barrier
//! 2. next_step() - Instruction fetch, unifies both end-of-frame triggers
//! 3. dispatch() - Retry policy around one registered command

use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

use super::context::{ExecContext, JoinBarrier};
use super::frames::return_frame;
use super::instruction::Instruction;
use super::registry::Registration;
use super::values::to_text;

/* ===================== Steps ===================== */

/// What the active frame offers next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// No frame at or above the cycle level is left
    Drained,
    /// The active frame has no further instruction (sentinel or empty text)
    FrameExhausted,
    /// Raw instruction text stored under `key`
    Instruction { key: String, text: String },
}

/* ===================== Public API ===================== */

/// Run the interpreter loop until the stack drops below `cycle_level`.
///
/// Forked work started by this cycle is joined before it returns. Returns
/// `false` when a strict instruction fails, an instruction cannot be
/// decoded, or the request is aborted.
pub fn run_cycle(ctx: &mut ExecContext, cycle_level: usize) -> bool {
    let barrier = JoinBarrier::new();
    let outer = ctx.replace_barrier(Some(barrier.clone()));
    let ok = cycle(ctx, cycle_level, &barrier);
    let failed = barrier.join();
    if failed > 0 {
        warn!(failed, "Forked instructions failed");
    }
    ctx.replace_barrier(outer);
    ok && !ctx.request().is_aborted()
}

/// Fetch the next step for the active frame, advancing its pointer.
pub fn next_step(ctx: &mut ExecContext, cycle_level: usize) -> Step {
    if ctx.depth() <= cycle_level {
        return Step::Drained;
    }
    let Some(frame) = ctx.frames.last_mut() else {
        return Step::Drained;
    };
    if frame.is_exhausted() {
        return Step::FrameExhausted;
    }
    let key = frame.advance();
    let text = ctx
        .lookup(&key)
        .map(|v| to_text(&v).trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        Step::FrameExhausted
    } else {
        Step::Instruction { key, text }
    }
}

fn cycle(ctx: &mut ExecContext, cycle_level: usize, barrier: &JoinBarrier) -> bool {
    loop {
        if ctx.request().is_aborted() {
            error!(request = %ctx.request().id(), "Request aborted");
            return false;
        }

        let (key, raw) = match next_step(ctx, cycle_level) {
            Step::Drained => return true,
            Step::FrameExhausted => {
                return_frame(ctx, None);
                continue;
            }
            Step::Instruction { key, text } => (key, text),
        };

        let expanded = match ctx.expand(&raw) {
            Ok(text) => text,
            Err(e) => {
                error!(key = %key, error = %e, "Cannot expand instruction");
                return false;
            }
        };

        let instruction = match Instruction::parse(&expanded) {
            Ok(instruction) => instruction,
            Err(e) => {
                error!(key = %key, error = %e, "Malformed instruction");
                return false;
            }
        };

        let Some(registration) = ctx.engine().registry().get(&instruction.command) else {
            error!(
                key = %key,
                command = %instruction.command,
                known = %ctx.engine().registry().keys().join(", "),
                "Unknown command"
            );
            return false;
        };

        debug!(
            key = %key,
            command = %instruction.command,
            level = ctx.level(),
            "Dispatching instruction"
        );

        // async commands manage their own concurrency
        let parallel = instruction.parallel && !registration.is_async();
        if parallel {
            fork(ctx, barrier, registration, instruction, key);
            continue;
        }

        if !dispatch(ctx, &registration, &instruction, &key) {
            if instruction.strict {
                error!(key = %key, "Instruction failed, aborting sequence");
                return false;
            }
            warn!(key = %key, "Optional instruction failed, continuing");
        }
    }
}

/// Run one instruction on its own thread with a private copy of the frames.
fn fork(
    ctx: &ExecContext,
    barrier: &JoinBarrier,
    registration: Registration,
    instruction: Instruction,
    key: String,
) {
    let mut forked = ctx.fork();
    let span = info_span!("fork", request = %ctx.request().id(), key = %key);
    let spawned = thread::Builder::new()
        .name(format!("relay-{}", key))
        .spawn(move || {
            let _entered = span.enter();
            let base = forked.depth();
            let mut ok = dispatch(&mut forked, &registration, &instruction, &key);
            // a forked call drains the frames it pushed on this thread
            if ok && forked.depth() > base {
                ok = run_cycle(&mut forked, base);
            }
            if !ok {
                warn!(key = %key, "Forked instruction failed");
            }
            ok
        });
    match spawned {
        Ok(handle) => barrier.register(handle),
        Err(e) => error!(error = %e, "Cannot fork instruction"),
    }
}

/// Init once, then Run under the instruction's idle/pause/total budget.
pub fn dispatch(
    ctx: &mut ExecContext,
    registration: &Registration,
    instruction: &Instruction,
    key: &str,
) -> bool {
    let tick = ctx.engine().tick();
    let timing = instruction.timing;

    if timing.idle > 0 {
        info!(key, idle = timing.idle, "Idle wait before instruction");
        thread::sleep(units(tick, timing.idle));
    }

    let mut invocation = match registration.command().init(&instruction.payload, ctx) {
        Ok(invocation) => invocation,
        Err(e) => {
            error!(key, command = %instruction.command, error = %e, "Cannot initialize command");
            return false;
        }
    };

    let pause = timing.pause;
    let mut total = timing.total;
    let mut attempt = 0u32;
    while total >= 0 {
        attempt += 1;
        if invocation.run(ctx) {
            return true;
        }
        if pause <= 0 || total - pause < 0 || ctx.request().is_aborted() {
            break;
        }
        info!(key, attempt, pause, remaining = total, "Waiting before retry");
        thread::sleep(units(tick, pause));
        total -= pause;
    }

    error!(key, attempts = attempt, "Command finally failed");
    false
}

fn units(tick: Duration, count: i64) -> Duration {
    tick.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
}
