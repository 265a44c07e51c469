//! Snippet runtime: the code that runs inside the isolation boundary
//!
//! Wraps one QuickJS [`Runtime`] (its own heap, no host bindings). Every
//! snippet gets a fresh [`Context`] within it, so nothing a snippet does can
//! leak into the next call.
//!
//! The JavaScript prelude below installs the output-recording shim, compiles
//! the snippet in strict mode as `function (console, inputs) { ... }`, and
//! reports back a JSON envelope. The same runtime backs both the isolated
//! boundary thread and the direct evaluator, so log formatting and return
//! value serialization are identical on both paths.

use rquickjs::{Coerced, Context, Ctx, Exception, FromJs, Function, Runtime, Value};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::engine::isolation::IsolationConfig;
use crate::error::ExecutionError;
use crate::protocol::ExecutionResult;

/// Evaluates to the `run(code, inputsJson)` entry point.
///
/// `JSON` and `String` are captured before the snippet runs, so a snippet
/// that clobbers them cannot corrupt its own result envelope.
const PRELUDE: &str = r#"
(function () {
  'use strict';
  const stringify = JSON.stringify.bind(JSON);
  const parse = JSON.parse.bind(JSON);
  const toText = String;
  const UNSERIALIZABLE = '[Unserializable Object]';

  function safeText(value) {
    try { return toText(value); } catch (_) { return UNSERIALIZABLE; }
  }

  function formatArg(arg) {
    if (typeof arg === 'string') return arg;
    if (arg instanceof Error) return safeText(arg.name) + ': ' + safeText(arg.message);
    if (arg !== null && typeof arg === 'object') {
      try {
        const text = stringify(arg, null, 2);
        return text === undefined ? safeText(arg) : text;
      } catch (_) {
        return UNSERIALIZABLE;
      }
    }
    return safeText(arg);
  }

  function createRecorder() {
    const lines = [];
    const counts = Object.create(null);
    const timers = Object.create(null);
    let indent = '';

    const record = (args) => {
      let line = '';
      for (let i = 0; i < args.length; i++) {
        line += (i === 0 ? '' : ' ') + formatArg(args[i]);
      }
      lines[lines.length] = indent + line;
    };
    const emit = (...args) => record(args);

    const shim = {
      log: emit,
      info: emit,
      debug: emit,
      trace: emit,
      warn: emit,
      error: emit,
      dir: (value) => record([value]),
      table: (data) => record([data]),
      clear: () => { lines.length = 0; },
      assert: (condition, ...args) => {
        if (!condition) record(args.length ? ['Assertion failed:', ...args] : ['Assertion failed']);
      },
      count: (label = 'default') => {
        counts[label] = (counts[label] || 0) + 1;
        record([label + ': ' + counts[label]]);
      },
      countReset: (label = 'default') => { counts[label] = 0; },
      group: (...args) => { if (args.length) record(args); indent += '  '; },
      groupCollapsed: (...args) => { if (args.length) record(args); indent += '  '; },
      groupEnd: () => { indent = indent.slice(0, -2); },
      time: (label = 'default') => { timers[label] = Date.now(); },
      timeLog: (label = 'default', ...args) => {
        if (label in timers) record([label + ': ' + (Date.now() - timers[label]) + 'ms', ...args]);
      },
      timeEnd: (label = 'default') => {
        if (label in timers) {
          record([label + ': ' + (Date.now() - timers[label]) + 'ms']);
          delete timers[label];
        }
      },
    };
    return { shim, lines };
  }

  function serializeReturn(value) {
    if (value === undefined) return { value: null, degraded: false };
    try {
      const text = stringify(value);
      if (text !== undefined) return { value: text, degraded: false };
    } catch (_) {}
    return { value: stringify(safeText(value)), degraded: true };
  }

  function describeError(error) {
    try {
      if (error !== null && typeof error === 'object' && 'message' in error) {
        const kind = error.name ? safeText(error.name) : 'Error';
        return kind + ': ' + safeText(error.message);
      }
    } catch (_) {}
    return 'Error: ' + safeText(error);
  }

  return function run(code, inputsJson) {
    const { shim, lines } = createRecorder();
    let inputs;
    try { inputs = parse(inputsJson); } catch (_) { inputs = {}; }
    globalThis.console = shim;
    try {
      const body = new Function('console', 'inputs', '"use strict";\n' + code);
      const returned = serializeReturn(body(shim, inputs));
      return stringify({ ok: true, logs: lines, value: returned.value, degraded: returned.degraded });
    } catch (error) {
      return stringify({ ok: false, logs: lines, error: describeError(error) });
    }
  };
})()
"#;

/// Result envelope produced by the prelude's `run`.
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    logs: Vec<String>,
    /// JSON text of the return value, absent for `undefined`.
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    degraded: bool,
    #[serde(default)]
    error: Option<String>,
}

/// One finished snippet run.
#[derive(Debug, Clone)]
pub struct SnippetOutcome {
    pub result: ExecutionResult,
    /// The return value fell back to its string form.
    pub degraded: bool,
    /// The interrupt hook stopped the run.
    pub interrupted: bool,
}

impl SnippetOutcome {
    fn failed(error: ExecutionError, output: Option<String>) -> Self {
        Self {
            result: ExecutionResult::failure(error, output),
            degraded: false,
            interrupted: false,
        }
    }
}

/// Deadline bookkeeping for the QuickJS interrupt hook.
#[derive(Debug)]
struct InterruptState {
    epoch: Instant,
    /// Milliseconds since `epoch`; `u64::MAX` while disarmed.
    deadline_ms: AtomicU64,
    /// Raised from outside (teardown) to stop whatever is running now.
    abort: Arc<AtomicBool>,
    tripped: AtomicBool,
}

impl InterruptState {
    fn new(abort: Arc<AtomicBool>) -> Self {
        Self {
            epoch: Instant::now(),
            deadline_ms: AtomicU64::new(u64::MAX),
            abort,
            tripped: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn arm(&self, budget: Duration) {
        self.tripped.store(false, Ordering::SeqCst);
        let deadline = self.now_ms().saturating_add(budget.as_millis() as u64);
        self.deadline_ms.store(deadline, Ordering::SeqCst);
    }

    /// Disarm and report whether the hook fired during the run.
    fn disarm(&self) -> bool {
        self.deadline_ms.store(u64::MAX, Ordering::SeqCst);
        self.tripped.swap(false, Ordering::SeqCst)
    }

    fn should_interrupt(&self) -> bool {
        let expired = self.now_ms() >= self.deadline_ms.load(Ordering::SeqCst);
        if expired || self.abort.load(Ordering::SeqCst) {
            self.tripped.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }
}

/// A QuickJS runtime configured for untrusted snippets.
pub struct SnippetRuntime {
    runtime: Runtime,
    interrupt: Arc<InterruptState>,
}

impl SnippetRuntime {
    pub fn new(config: &IsolationConfig, abort: Arc<AtomicBool>) -> rquickjs::Result<Self> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(config.memory_limit_bytes);
        runtime.set_max_stack_size(config.max_stack_bytes);

        let interrupt = Arc::new(InterruptState::new(abort));
        let hook = Arc::clone(&interrupt);
        runtime.set_interrupt_handler(Some(Box::new(move || hook.should_interrupt())));

        Ok(Self { runtime, interrupt })
    }

    /// Build a context and compile the prelude once, without running user code.
    pub fn probe(&self) -> Result<(), String> {
        let context = Context::full(&self.runtime).map_err(|e| e.to_string())?;
        context.with(|ctx| match ctx.eval::<Function, _>(PRELUDE) {
            Ok(_) => Ok(()),
            Err(rquickjs::Error::Exception) => Err(describe_exception(&ctx, ctx.catch())),
            Err(err) => Err(err.to_string()),
        })
    }

    /// Run one snippet. Never panics; every failure becomes a failed result.
    ///
    /// `budget` bounds the run through the interrupt hook. An interrupted run
    /// is reported as a timeout of `timeout_ms`, the caller-facing budget.
    pub fn run(&self, code: &str, inputs_json: &str, timeout_ms: u64, budget: Duration) -> SnippetOutcome {
        self.interrupt.arm(budget);
        let outcome = self.invoke(code, inputs_json);
        if self.interrupt.disarm() {
            debug!(timeout_ms, "snippet interrupted");
            return SnippetOutcome {
                interrupted: true,
                ..SnippetOutcome::failed(ExecutionError::Timeout(timeout_ms), None)
            };
        }
        outcome
    }

    fn invoke(&self, code: &str, inputs_json: &str) -> SnippetOutcome {
        let context = match Context::full(&self.runtime) {
            Ok(context) => context,
            Err(err) => {
                return SnippetOutcome::failed(
                    ExecutionError::Runtime(format!("InternalError: {err}")),
                    None,
                )
            }
        };

        context.with(|ctx| match call_prelude(&ctx, code, inputs_json) {
            Ok(envelope) => decode_envelope(&envelope),
            Err(rquickjs::Error::Exception) => SnippetOutcome::failed(
                ExecutionError::Runtime(describe_exception(&ctx, ctx.catch())),
                None,
            ),
            Err(err) => SnippetOutcome::failed(
                ExecutionError::Runtime(format!("InternalError: {err}")),
                None,
            ),
        })
    }
}

fn call_prelude(ctx: &Ctx<'_>, code: &str, inputs_json: &str) -> rquickjs::Result<String> {
    let run: Function = ctx.eval(PRELUDE)?;
    run.call((code, inputs_json))
}

fn decode_envelope(text: &str) -> SnippetOutcome {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            return SnippetOutcome::failed(
                ExecutionError::Runtime(format!("InternalError: malformed result envelope: {err}")),
                None,
            )
        }
    };

    let output = (!envelope.logs.is_empty()).then(|| envelope.logs.join("\n"));

    if !envelope.ok {
        let description = envelope
            .error
            .unwrap_or_else(|| "Error: unknown failure".to_string());
        return SnippetOutcome::failed(ExecutionError::Runtime(description), output);
    }

    let return_value = envelope.value.map(|json| {
        serde_json::from_str(&json).unwrap_or_else(|err| {
            trace!(error = %err, "return value JSON did not parse, keeping raw text");
            serde_json::Value::String(json)
        })
    });

    SnippetOutcome {
        result: ExecutionResult::success(output, return_value),
        degraded: envelope.degraded,
        interrupted: false,
    }
}

fn describe_exception<'js>(ctx: &Ctx<'js>, caught: Value<'js>) -> String {
    if let Some(obj) = caught.as_object() {
        let kind = obj
            .get::<_, Option<String>>("name")
            .ok()
            .flatten()
            .unwrap_or_else(|| "Error".to_string());
        if let Some(exception) = Exception::from_object(obj.clone()) {
            return format!("{kind}: {}", exception.message().unwrap_or_default());
        }
    }

    match Coerced::<String>::from_js(ctx, caught) {
        Ok(text) => format!("Error: {}", text.0),
        Err(err) => format!("Error: unprintable exception ({err})"),
    }
}
