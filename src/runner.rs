//! Structured subprocess invocation.
//!
//! [`CommandRunner`] wraps one external program (here: `git` or `diff`) and
//! turns structured options into argv, streams stdout to the caller, drains
//! stderr into the logger, and enforces timeouts. All command execution in
//! this crate goes through it, so every launch gets the same `$ program args`
//! debug logging and duration tracing.
//!
//! A note on timeouts: exceeding the deadline resolves the invocation with
//! [`RunnerError::Timeout`] but does not kill the child. The reader threads
//! keep draining its pipes so it can run to completion on its own.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use indexmap::IndexMap;
use wait_timeout::ChildExt;

/// Sink for child stderr lines. The default forwards to [`log::error!`];
/// tests inject a collector.
pub trait Logger: Send + Sync {
    fn error(&self, line: &str);
}

/// Default [`Logger`] backed by the `log` facade.
#[derive(Debug, Default)]
pub struct FacadeLogger;

impl Logger for FacadeLogger {
    fn error(&self, line: &str) {
        log::error!("{line}");
    }
}

/// Observation points around process creation, for test injection.
pub trait Tracer: Send + Sync {
    /// Called just before spawning.
    fn execute(&self, program: &OsStr, argv: &[OsString]);
    /// Called synchronously after spawning, with the child's pid.
    fn executing(&self, program: &OsStr, argv: &[OsString], pid: u32);
}

/// How option names render into argv.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptStyle {
    /// `--name[=value]` for long names, `-n [value]` for single characters.
    #[default]
    GnuOpt,
    /// `-name [value]` for every name (the style `diff` expects).
    OneDash,
}

/// An option's payload: a bare flag, one value, or a repeated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptValue {
    Flag,
    Value(String),
    /// Rendered as one occurrence of the option per value (`-p a -p b`).
    Values(Vec<String>),
}

/// Ordered option map; rendering preserves insertion order.
///
/// The key `-` is special: its value is a string whose every character
/// becomes an individual short flag.
pub type Opts = IndexMap<String, OptValue>;

/// Overrides the `PATH` seen by the child; wins over any `PATH` in the env
/// maps.
pub enum PathOverride {
    Value(OsString),
    /// Resolved at spawn time.
    Provider(Box<dyn Fn() -> OsString + Send + Sync>),
}

impl PathOverride {
    fn resolve(&self) -> OsString {
        match self {
            PathOverride::Value(value) => value.clone(),
            PathOverride::Provider(provider) => provider(),
        }
    }
}

impl std::fmt::Debug for PathOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathOverride::Value(value) => f.debug_tuple("Value").field(value).finish(),
            PathOverride::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Which layer supplied the env map a child was launched with. Reported in
/// timeout errors to make hangs attributable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    Invocation,
    Runner,
    Process,
}

impl std::fmt::Display for EnvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvSource::Invocation => write!(f, "invocation env"),
            EnvSource::Runner => write!(f, "runner env"),
            EnvSource::Process => write!(f, "process env"),
        }
    }
}

#[derive(Debug)]
pub enum RunnerError {
    /// The program could not be started at all.
    SpawningFailure {
        program: String,
        source: std::io::Error,
    },
    /// The child exited non-zero and the caller did not claim the exit code.
    ChildProcessFailure { program: String, exit_code: i32 },
    /// The deadline elapsed before the child exited. The child keeps running.
    Timeout {
        program: String,
        args: Vec<String>,
        env_source: EnvSource,
    },
    /// The stdout sink failed (I/O error writing, or the reader died).
    BadOutputStream { program: String, detail: String },
    /// A flag-only option key contained `=`.
    BadOptionsKey { key: String },
    /// Waiting on the child failed.
    Wait {
        program: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::SpawningFailure { program, source } => {
                write!(f, "failed to spawn {program}: {source}")
            }
            RunnerError::ChildProcessFailure { program, exit_code } => {
                write!(f, "{program} failed with exit code {exit_code}")
            }
            RunnerError::Timeout {
                program,
                args,
                env_source,
            } => {
                write!(
                    f,
                    "{program} {} timed out (launched with {env_source})",
                    args.join(" ")
                )
            }
            RunnerError::BadOutputStream { program, detail } => {
                write!(f, "stdout stream of {program} failed: {detail}")
            }
            RunnerError::BadOptionsKey { key } => {
                write!(f, "option key {key:?} may not contain '=' without a value")
            }
            RunnerError::Wait { program, source } => {
                write!(f, "failed to wait for {program}: {source}")
            }
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::SpawningFailure { source, .. } | RunnerError::Wait { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Static configuration for a [`CommandRunner`].
pub struct CommandSpec {
    pub program: OsString,
    /// Human-readable name used in logs and errors; defaults to the program.
    pub display_name: Option<String>,
    pub path: Option<PathOverride>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    /// When set, invocations name a subcommand that renders before options.
    pub uses_subcommands: bool,
    pub opt_style: OptStyle,
    pub timeout: Option<Duration>,
    pub output_encoding: &'static Encoding,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            display_name: None,
            path: None,
            cwd: None,
            env: None,
            uses_subcommands: false,
            opt_style: OptStyle::GnuOpt,
            timeout: None,
            output_encoding: UTF_8,
        }
    }

    pub fn subcommands(mut self, uses: bool) -> Self {
        self.uses_subcommands = uses;
        self
    }

    pub fn opt_style(mut self, style: OptStyle) -> Self {
        self.opt_style = style;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("cwd", &self.cwd)
            .field("uses_subcommands", &self.uses_subcommands)
            .field("opt_style", &self.opt_style)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Runs one external program with consistent logging, option rendering and
/// timeout behavior. Create one per program and reuse it.
pub struct CommandRunner {
    spec: CommandSpec,
    logger: Arc<dyn Logger>,
    tracer: Option<Arc<dyn Tracer>>,
}

impl CommandRunner {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            logger: Arc::new(FacadeLogger),
            tracer: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn display_name(&self) -> String {
        self.spec
            .display_name
            .clone()
            .unwrap_or_else(|| self.spec.program.to_string_lossy().into_owned())
    }

    /// Start building one invocation.
    pub fn invoke(&self) -> Invocation<'_> {
        Invocation {
            runner: self,
            subcommand: None,
            opts: Opts::new(),
            args: Vec::new(),
            cwd: None,
            env: None,
            stdin: None,
            timeout: self.spec.timeout,
            logger: None,
        }
    }
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("spec", &self.spec)
            .finish()
    }
}

/// Handed to stream consumers; signalling it stops record delivery (the
/// child's remaining output is drained and discarded).
#[derive(Debug)]
pub struct StopToken {
    stopped: bool,
}

impl StopToken {
    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

/// One pending subprocess invocation, built fluently and consumed by a
/// terminal method: [`run`](Self::run), [`output`](Self::output),
/// [`status`](Self::status), [`stream`](Self::stream) or
/// [`write_to`](Self::write_to).
pub struct Invocation<'a> {
    runner: &'a CommandRunner,
    subcommand: Option<String>,
    opts: Opts,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    logger: Option<Arc<dyn Logger>>,
}

impl<'a> Invocation<'a> {
    pub fn subcommand(mut self, name: impl Into<String>) -> Self {
        debug_assert!(self.runner.spec.uses_subcommands);
        self.subcommand = Some(name.into());
        self
    }

    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.opts.insert(name.into(), OptValue::Flag);
        self
    }

    /// Insert several single-character flags at once (the `-` pseudo-key).
    pub fn short_flags(mut self, chars: impl Into<String>) -> Self {
        self.opts.insert("-".into(), OptValue::Value(chars.into()));
        self
    }

    pub fn opt(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.insert(name.into(), OptValue::Value(value.into()));
        self
    }

    pub fn opt_values(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = String>,
    ) -> Self {
        self.opts
            .insert(name.into(), OptValue::Values(values.into_iter().collect()));
        self
    }

    pub fn opts(mut self, opts: Opts) -> Self {
        self.opts.extend(opts);
        self
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn feed_stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    // =========================================================================
    // Terminal methods
    // =========================================================================

    /// Run, capture stdout, fail on non-zero exit.
    pub fn run(self) -> Result<String, RunnerError> {
        let program = self.display_name();
        let (code, stdout) = self.output()?;
        if code != 0 {
            return Err(RunnerError::ChildProcessFailure {
                program,
                exit_code: code,
            });
        }
        Ok(stdout)
    }

    /// Run and capture stdout, handing the exit code back to the caller.
    ///
    /// This is the variant for commands whose exit code carries meaning
    /// beyond success/failure (`rev-parse` on a maybe-ref, `diff`'s 0/1).
    pub fn output(self) -> Result<(i32, String), RunnerError> {
        let encoding = self.runner.spec.output_encoding;
        let mut launched = self.launch(Stdio::piped())?;
        let stdout = launched.child.stdout.take().expect("stdout was piped");
        let reader = thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut stdout = stdout;
            let mut buffer = Vec::new();
            stdout.read_to_end(&mut buffer)?;
            Ok(buffer)
        });
        launched.feed_stdin();
        let status = launched.wait()?;
        let bytes = match reader.join() {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                return Err(RunnerError::BadOutputStream {
                    program: launched.program,
                    detail: err.to_string(),
                });
            }
            Err(_) => {
                return Err(RunnerError::BadOutputStream {
                    program: launched.program,
                    detail: "stdout reader panicked".into(),
                });
            }
        };
        launched.finish(status.success());
        let (text, _, _) = encoding.decode(&bytes);
        Ok((exit_code(status), text.into_owned()))
    }

    /// Run without capturing stdout; returns the exit code.
    pub fn status(self) -> Result<i32, RunnerError> {
        let mut launched = self.launch(Stdio::null())?;
        launched.feed_stdin();
        let status = launched.wait()?;
        launched.finish(status.success());
        Ok(exit_code(status))
    }

    /// Run, streaming decoded stdout chunks to `consumer` on the calling
    /// thread. The consumer may signal its [`StopToken`] to end delivery.
    ///
    /// Resolves only when the child has exited *and* its stdout has closed;
    /// returns the exit code for the caller to interpret.
    pub fn stream<F>(self, mut consumer: F) -> Result<i32, RunnerError>
    where
        F: FnMut(&str, &mut StopToken),
    {
        let encoding = self.runner.spec.output_encoding;
        let mut launched = self.launch(Stdio::piped())?;
        let stdout = launched.child.stdout.take().expect("stdout was piped");
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        thread::spawn(move || {
            let mut stdout = stdout;
            let mut buf = [0u8; 8192];
            let mut forwarding = true;
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if forwarding && tx.send(buf[..n].to_vec()).is_err() {
                            // Receiver gone (timeout path); keep draining so
                            // the child doesn't block on a full pipe.
                            forwarding = false;
                        }
                    }
                }
            }
        });
        launched.feed_stdin();

        let mut decoder = encoding.new_decoder();
        let mut token = StopToken { stopped: false };
        let mut text = String::new();
        let deadline = launched.timeout.map(|t| Instant::now() + t);
        let mut exit: Option<ExitStatus> = None;
        let mut stdout_closed = false;
        loop {
            if !stdout_closed {
                match rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(chunk) => {
                        text.clear();
                        decode_append(&mut decoder, &chunk, false, &mut text);
                        if !token.stopped && !text.is_empty() {
                            consumer(&text, &mut token);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => stdout_closed = true,
                }
            } else if exit.is_none() {
                // Stdout is done but the child still runs; wait in slices so
                // the deadline check below stays live.
                exit = launched
                    .child
                    .wait_timeout(Duration::from_millis(20))
                    .map_err(|err| launched.wait_error(err))?;
            }
            if exit.is_none() {
                exit = launched
                    .child
                    .try_wait()
                    .map_err(|err| launched.wait_error(err))?;
            }
            if stdout_closed && let Some(status) = exit {
                text.clear();
                decode_append(&mut decoder, &[], true, &mut text);
                if !token.stopped && !text.is_empty() {
                    consumer(&text, &mut token);
                }
                launched.finish(status.success());
                return Ok(exit_code(status));
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Err(launched.timeout_error());
            }
        }
    }

    /// Run with stdout piped into a [`Write`] sink; fails on non-zero exit.
    pub fn write_to<W>(self, sink: W) -> Result<(), RunnerError>
    where
        W: Write + Send + 'static,
    {
        let mut launched = self.launch(Stdio::piped())?;
        let stdout = launched.child.stdout.take().expect("stdout was piped");
        let writer = thread::spawn(move || -> std::io::Result<()> {
            let mut stdout = stdout;
            let mut sink = sink;
            std::io::copy(&mut stdout, &mut sink)?;
            sink.flush()
        });
        launched.feed_stdin();
        let status = launched.wait()?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(RunnerError::BadOutputStream {
                    program: launched.program,
                    detail: err.to_string(),
                });
            }
            Err(_) => {
                return Err(RunnerError::BadOutputStream {
                    program: launched.program,
                    detail: "stdout writer panicked".into(),
                });
            }
        }
        launched.finish(status.success());
        if !status.success() {
            return Err(RunnerError::ChildProcessFailure {
                program: launched.program,
                exit_code: exit_code(status),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn display_name(&self) -> String {
        match &self.subcommand {
            Some(sub) => format!("{} {sub}", self.runner.display_name()),
            None => self.runner.display_name(),
        }
    }

    fn launch(self, stdout: Stdio) -> Result<Launched, RunnerError> {
        let spec = &self.runner.spec;
        let program_desc = self.display_name();

        let mut argv: Vec<OsString> = Vec::new();
        if let Some(sub) = &self.subcommand {
            argv.push(sub.into());
        }
        argv.extend(render_opts(&self.opts, spec.opt_style)?);
        argv.extend(self.args.iter().cloned());

        let env_source = if self.env.is_some() {
            EnvSource::Invocation
        } else if spec.env.is_some() {
            EnvSource::Runner
        } else {
            EnvSource::Process
        };

        let cwd = match (&spec.cwd, &self.cwd) {
            (Some(base), Some(sub)) => Some(base.join(sub)),
            (Some(base), None) => Some(base.clone()),
            (None, Some(sub)) => Some(sub.clone()),
            (None, None) => None,
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&argv);
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }
        if let Some(env) = &spec.env {
            cmd.envs(env);
        }
        if let Some(env) = &self.env {
            cmd.envs(env);
        }
        if let Some(path) = &spec.path {
            cmd.env("PATH", path.resolve());
        }
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(stdout);
        cmd.stderr(Stdio::piped());

        let argv_display: Vec<String> = argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        match &cwd {
            Some(dir) => log::debug!(
                "$ {} {} [{}]",
                spec.program.to_string_lossy(),
                argv_display.join(" "),
                dir.display()
            ),
            None => log::debug!(
                "$ {} {}",
                spec.program.to_string_lossy(),
                argv_display.join(" ")
            ),
        }

        if let Some(tracer) = &self.runner.tracer {
            tracer.execute(&spec.program, &argv);
        }
        let mut child = cmd.spawn().map_err(|source| RunnerError::SpawningFailure {
            program: program_desc.clone(),
            source,
        })?;
        if let Some(tracer) = &self.runner.tracer {
            tracer.executing(&spec.program, &argv, child.id());
        }

        let logger = self
            .logger
            .unwrap_or_else(|| Arc::clone(&self.runner.logger));
        let stderr = child.stderr.take().expect("stderr was piped");
        let stderr_thread = spawn_stderr_logger(stderr, logger, program_desc.clone());

        Ok(Launched {
            child,
            program: program_desc,
            argv: argv_display,
            env_source,
            timeout: self.timeout,
            stdin: self.stdin,
            stderr_thread: Some(stderr_thread),
            started: Instant::now(),
        })
    }
}

struct Launched {
    child: Child,
    program: String,
    argv: Vec<String>,
    env_source: EnvSource,
    timeout: Option<Duration>,
    stdin: Option<Vec<u8>>,
    stderr_thread: Option<thread::JoinHandle<()>>,
    started: Instant,
}

impl Launched {
    /// Write the pending stdin payload and close the pipe. The reader
    /// threads are already draining the output pipes, so this can't
    /// deadlock on a full pipe.
    fn feed_stdin(&mut self) {
        if let Some(bytes) = self.stdin.take()
            && let Some(mut pipe) = self.child.stdin.take()
        {
            // The child may exit without reading everything; that's its call.
            let _ = pipe.write_all(&bytes);
        }
    }

    /// Wait for exit, honoring the deadline. On timeout the child is left
    /// running and the stderr thread stays behind to drain it.
    fn wait(&mut self) -> Result<ExitStatus, RunnerError> {
        let status = match self.timeout {
            Some(limit) => match self
                .child
                .wait_timeout(limit)
                .map_err(|err| self.wait_error(err))?
            {
                Some(status) => status,
                None => return Err(self.timeout_error()),
            },
            None => self.child.wait().map_err(|err| self.wait_error(err))?,
        };
        Ok(status)
    }

    fn timeout_error(&self) -> RunnerError {
        RunnerError::Timeout {
            program: self.program.clone(),
            args: self.argv.clone(),
            env_source: self.env_source,
        }
    }

    fn wait_error(&self, source: std::io::Error) -> RunnerError {
        RunnerError::Wait {
            program: self.program.clone(),
            source,
        }
    }

    /// Join the stderr drain and emit the duration trace line.
    fn finish(&mut self, ok: bool) {
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        log::debug!(
            "[casefile-trace] cmd=\"{} {}\" dur={:.1}ms ok={}",
            self.program,
            self.argv.join(" "),
            self.started.elapsed().as_secs_f64() * 1000.0,
            ok
        );
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    // Killed-by-signal has no code; report -1 rather than inventing one.
    status.code().unwrap_or(-1)
}

/// Drain stderr line by line into the logger, under a banner naming the
/// program. A panicking logger is reported and does not abort the child.
fn spawn_stderr_logger(
    stderr: ChildStderr,
    logger: Arc<dyn Logger>,
    program: String,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        let mut banner_emitted = false;
        for line in reader.lines().map_while(Result::ok) {
            let line = line.trim().to_string();
            let emit = |text: &str| {
                let result = catch_unwind(AssertUnwindSafe(|| logger.error(text)));
                if result.is_err() {
                    log::error!("stderr logger for {program} panicked; output dropped");
                }
            };
            if !banner_emitted {
                emit(&format!("----- {program} -----"));
                banner_emitted = true;
            }
            emit(&format!("    {line}"));
        }
    })
}

fn decode_append(decoder: &mut Decoder, mut bytes: &[u8], last: bool, out: &mut String) {
    loop {
        let needed = decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() + 16);
        out.reserve(needed);
        let (result, read, _) = decoder.decode_to_string(bytes, out, last);
        bytes = &bytes[read..];
        if result == CoderResult::InputEmpty {
            break;
        }
    }
}

fn render_opts(opts: &Opts, style: OptStyle) -> Result<Vec<OsString>, RunnerError> {
    let mut argv: Vec<OsString> = Vec::new();
    for (key, value) in opts {
        if key == "-" {
            // Each character of the value is an individual short flag.
            let chars = match value {
                OptValue::Value(chars) => chars.clone(),
                OptValue::Flag => String::new(),
                OptValue::Values(groups) => groups.concat(),
            };
            for ch in chars.chars() {
                argv.push(format!("-{ch}").into());
            }
            continue;
        }
        match value {
            OptValue::Flag => {
                if key.contains('=') {
                    return Err(RunnerError::BadOptionsKey { key: key.clone() });
                }
                argv.push(render_name(key, style).into());
            }
            OptValue::Value(value) => render_valued(&mut argv, key, value, style),
            OptValue::Values(values) => {
                for value in values {
                    render_valued(&mut argv, key, value, style);
                }
            }
        }
    }
    Ok(argv)
}

fn render_name(key: &str, style: OptStyle) -> String {
    match style {
        OptStyle::GnuOpt if key.chars().count() > 1 => format!("--{key}"),
        _ => format!("-{key}"),
    }
}

fn render_valued(argv: &mut Vec<OsString>, key: &str, value: &str, style: OptStyle) {
    match style {
        // Long GNU options take their value inline; short ones as a
        // separate argument.
        OptStyle::GnuOpt if key.chars().count() > 1 => {
            argv.push(format!("--{key}={value}").into());
        }
        _ => {
            argv.push(render_name(key, style).into());
            argv.push(value.into());
        }
    }
}
