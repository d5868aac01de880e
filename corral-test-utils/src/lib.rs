//! In-process stand-in for the instance management service.
//!
//! [`SimulatedService`] keeps instances and operations in memory and runs a
//! handful of shell-like commands over in-memory pipes, so the orchestrator
//! can be exercised end to end without a virtualization backend.

use async_trait::async_trait;
use corral::{ExecChannels, ExecPost, InstanceService, ServiceHandle};
use corral_shared::constants::metadata;
use corral_shared::{
    CorralError, CorralResult, InstanceSpec, InstanceState, Operation, OperationId,
    OperationKind, OperationStatus, SourceType, StateAction, StateChange,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Images the simulated service can create instances from.
pub const DEFAULT_IMAGES: &[&str] = &["ubuntu-22.04", "ubuntu-24.04", "alpine"];

/// Group database of every simulated instance.
pub const DEFAULT_GROUPS: &[(&str, u32)] = &[
    ("root", 0),
    ("adm", 4),
    ("sudo", 27),
    ("docker", 121),
    ("ubuntu", 1000),
];

/// Number of calls made to each service method.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub update_state: usize,
    pub exec: usize,
    pub get_operation: usize,
    pub cancel: usize,
}

#[derive(Default)]
struct Counters {
    create: AtomicUsize,
    update_state: AtomicUsize,
    exec: AtomicUsize,
    get_operation: AtomicUsize,
    cancel: AtomicUsize,
}

struct TrackedOperation {
    op: Operation,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SimState {
    next_id: u64,
    instances: HashMap<String, InstanceState>,
    operations: HashMap<OperationId, TrackedOperation>,
    execs: Vec<ExecPost>,
    cancelled: Vec<OperationId>,
    /// Pipes of finished commands kept open by `linger_stdio`.
    lingering: Vec<CommandIo>,
}

impl SimState {
    fn register(&mut self, kind: OperationKind) -> OperationId {
        self.next_id += 1;
        let id = OperationId::new(format!("op-{}-{}", kind, self.next_id));
        self.operations.insert(
            id.clone(),
            TrackedOperation {
                op: Operation::pending(id.clone(), kind),
                task: None,
            },
        );
        id
    }

    fn set_status(&mut self, id: &OperationId, status: OperationStatus) {
        if let Some(tracked) = self.operations.get_mut(id)
            && tracked.op.status.can_transition_to(status)
        {
            tracked.op.status = status;
        }
    }

    fn fail(&mut self, id: &OperationId, reason: impl Into<String>) {
        if let Some(tracked) = self.operations.get_mut(id)
            && tracked.op.status.can_transition_to(OperationStatus::Failure)
        {
            tracked.op.status = OperationStatus::Failure;
            tracked.op.error = Some(reason.into());
        }
    }

    fn succeed(&mut self, id: &OperationId, meta: Map<String, Value>) {
        if let Some(tracked) = self.operations.get_mut(id)
            && tracked.op.status.can_transition_to(OperationStatus::Success)
        {
            tracked.op.status = OperationStatus::Success;
            tracked.op.metadata = meta;
        }
    }
}

/// Behaviour knobs of [`SimulatedService`].
#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    pub create_delay: Duration,
    pub start_delay: Duration,
    pub stop_delay: Duration,
    pub images: Vec<String>,
    pub groups: BTreeMap<String, u32>,
    /// Buffer size of each in-memory stdio pipe.
    pub pipe_capacity: usize,
    /// Replaces the metadata of every finished exec operation.
    pub exec_metadata: Option<Map<String, Value>>,
    /// Drop the attach notification instead of sending it.
    pub break_attach: bool,
    /// Hold the attach notification without ever sending it.
    pub hold_attach: bool,
    /// Report exec success but keep the command's pipes open.
    pub linger_stdio: bool,
    /// Count and record cancel requests but leave the operation running.
    pub ignore_cancel: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            create_delay: Duration::from_millis(20),
            start_delay: Duration::from_millis(20),
            stop_delay: Duration::from_millis(10),
            images: DEFAULT_IMAGES.iter().map(|s| s.to_string()).collect(),
            groups: DEFAULT_GROUPS
                .iter()
                .map(|(name, gid)| (name.to_string(), *gid))
                .collect(),
            pipe_capacity: 4096,
            exec_metadata: None,
            break_attach: false,
            hold_attach: false,
            linger_stdio: false,
            ignore_cancel: false,
        }
    }
}

/// In-memory instance management service.
///
/// Supported commands: `echo`, `cat`, `id`, `env`, `getent group <name>`,
/// `flood <bytes>` (writes that many bytes to stdout, then to stderr),
/// `sleep` (never finishes), `true`, `false` and `exit <code>`. Anything
/// else exits with 127.
pub struct SimulatedService {
    config: SimulatedConfig,
    state: Arc<Mutex<SimState>>,
    counters: Counters,
}

impl SimulatedService {
    pub fn new() -> Arc<Self> {
        Self::with_config(SimulatedConfig::default())
    }

    pub fn with_config(config: SimulatedConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Arc::new(Mutex::new(SimState::default())),
            counters: Counters::default(),
        })
    }

    /// Type-erased handle for the orchestrator.
    pub fn handle(self: &Arc<Self>) -> ServiceHandle {
        self.clone()
    }

    /// Make an instance exist in the given state without any operation.
    pub fn seed_instance(&self, name: &str, state: InstanceState) {
        self.state.lock().instances.insert(name.to_string(), state);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create: self.counters.create.load(Ordering::SeqCst),
            update_state: self.counters.update_state.load(Ordering::SeqCst),
            exec: self.counters.exec.load(Ordering::SeqCst),
            get_operation: self.counters.get_operation.load(Ordering::SeqCst),
            cancel: self.counters.cancel.load(Ordering::SeqCst),
        }
    }

    /// Exec requests received so far, oldest first.
    pub fn exec_posts(&self) -> Vec<ExecPost> {
        self.state.lock().execs.clone()
    }

    /// Operations a cancel request was received for, in order.
    pub fn cancelled(&self) -> Vec<OperationId> {
        self.state.lock().cancelled.clone()
    }

    /// Current snapshot of an operation, without counting a call.
    pub fn operation(&self, id: &OperationId) -> Option<Operation> {
        self.state.lock().operations.get(id).map(|t| t.op.clone())
    }

    fn spawn_tracked<F>(&self, id: &OperationId, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(fut);
        let mut state = self.state.lock();
        match state.operations.get_mut(id) {
            // Cancelled before the task was attached.
            Some(tracked) if tracked.op.is_terminal() => task.abort(),
            Some(tracked) => tracked.task = Some(task),
            None => task.abort(),
        }
    }

    fn pipe(&self) -> (DuplexStream, DuplexStream) {
        tokio::io::duplex(self.config.pipe_capacity)
    }
}

#[async_trait]
impl InstanceService for SimulatedService {
    async fn create_instance(&self, spec: &InstanceSpec) -> CorralResult<OperationId> {
        self.counters.create.fetch_add(1, Ordering::SeqCst);
        let id = self.state.lock().register(OperationKind::Create);

        let rejection = if self.state.lock().instances.contains_key(&spec.name) {
            Some(format!("instance '{}' already exists", spec.name))
        } else if spec.source_type == SourceType::Image
            && !self.config.images.iter().any(|i| *i == spec.image_alias)
        {
            Some(format!("image alias '{}' not found", spec.image_alias))
        } else {
            None
        };

        let state = self.state.clone();
        let delay = self.config.create_delay;
        let name = spec.name.clone();
        let op_id = id.clone();
        self.spawn_tracked(&id, async move {
            state.lock().set_status(&op_id, OperationStatus::Running);
            tokio::time::sleep(delay).await;
            let mut state = state.lock();
            match rejection {
                Some(reason) => state.fail(&op_id, reason),
                None => {
                    state.instances.insert(name, InstanceState::Stopped);
                    state.succeed(&op_id, Map::new());
                }
            }
        });

        tracing::debug!(operation = %id, instance = %spec.name, "Simulated create");
        Ok(id)
    }

    async fn update_state(&self, name: &str, change: StateChange) -> CorralResult<OperationId> {
        self.counters.update_state.fetch_add(1, Ordering::SeqCst);
        let kind = match change.action {
            StateAction::Start => OperationKind::Start,
            StateAction::Stop => OperationKind::Stop,
            StateAction::Restart => OperationKind::Restart,
        };
        let (id, exists) = {
            let mut state = self.state.lock();
            let id = state.register(kind);
            (id, state.instances.contains_key(name))
        };

        let (delay, target) = match change.action {
            StateAction::Start => (self.config.start_delay, InstanceState::Running),
            StateAction::Stop => (self.config.stop_delay, InstanceState::Stopped),
            StateAction::Restart => (
                self.config.stop_delay + self.config.start_delay,
                InstanceState::Running,
            ),
        };

        let state = self.state.clone();
        let name = name.to_string();
        let op_id = id.clone();
        self.spawn_tracked(&id, async move {
            state.lock().set_status(&op_id, OperationStatus::Running);
            tokio::time::sleep(delay).await;
            let mut state = state.lock();
            if exists {
                state.instances.insert(name, target);
                state.succeed(&op_id, Map::new());
            } else {
                state.fail(&op_id, format!("instance '{}' not found", name));
            }
        });

        Ok(id)
    }

    async fn exec(&self, name: &str, post: ExecPost) -> CorralResult<ExecChannels> {
        self.counters.exec.fetch_add(1, Ordering::SeqCst);
        let (id, running) = {
            let mut state = self.state.lock();
            state.execs.push(post.clone());
            let id = state.register(OperationKind::Exec);
            let running = state.instances.get(name).is_some_and(|s| s.is_running());
            (id, running)
        };

        let (client_stdin, sim_stdin) = self.pipe();
        let (sim_stdout, client_stdout) = self.pipe();
        let (sim_stderr, client_stderr) = self.pipe();
        let (attach_tx, attach_rx) = oneshot::channel();

        let state = self.state.clone();
        let groups = self.config.groups.clone();
        let exec_metadata = self.config.exec_metadata.clone();
        let break_attach = self.config.break_attach;
        let hold_attach = self.config.hold_attach;
        let linger_stdio = self.config.linger_stdio;
        let instance = name.to_string();
        let op_id = id.clone();
        self.spawn_tracked(&id, async move {
            let _unsent_attach = if break_attach {
                drop(attach_tx);
                None
            } else if hold_attach {
                Some(attach_tx)
            } else {
                let _ = attach_tx.send(());
                None
            };
            if !running {
                state
                    .lock()
                    .fail(&op_id, format!("instance '{}' is not running", instance));
                return;
            }
            state.lock().set_status(&op_id, OperationStatus::Running);

            let mut io = CommandIo {
                stdin: sim_stdin,
                stdout: sim_stdout,
                stderr: sim_stderr,
            };
            let code = run_command(&post, &groups, &mut io).await;
            if linger_stdio {
                state.lock().lingering.push(io);
            } else {
                // Close the pipes before reporting completion.
                drop(io);
            }

            let meta = exec_metadata.unwrap_or_else(|| {
                let mut meta = Map::new();
                meta.insert(metadata::EXIT_CODE.to_string(), Value::from(code));
                meta
            });
            state.lock().succeed(&op_id, meta);
        });

        Ok(ExecChannels {
            operation: id,
            stdin: Box::new(client_stdin),
            stdout: Box::new(client_stdout),
            stderr: Box::new(client_stderr),
            attached: attach_rx,
        })
    }

    async fn get_operation(&self, id: &OperationId) -> CorralResult<Operation> {
        self.counters.get_operation.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .operations
            .get(id)
            .map(|t| t.op.clone())
            .ok_or_else(|| CorralError::Validation(format!("unknown operation {}", id)))
    }

    async fn cancel_operation(&self, id: &OperationId) -> CorralResult<()> {
        self.counters.cancel.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.cancelled.push(id.clone());
        let tracked = state
            .operations
            .get_mut(id)
            .ok_or_else(|| CorralError::Validation(format!("unknown operation {}", id)))?;
        if tracked.op.is_terminal() || self.config.ignore_cancel {
            return Ok(());
        }
        if let Some(task) = tracked.task.take() {
            task.abort();
        }
        tracked.op.status = OperationStatus::Cancelled;
        tracked.op.error = Some("cancelled by request".to_string());
        tracing::debug!(operation = %id, "Simulated cancel");
        Ok(())
    }

    async fn instance_state(&self, name: &str) -> CorralResult<InstanceState> {
        Ok(self
            .state
            .lock()
            .instances
            .get(name)
            .copied()
            .unwrap_or(InstanceState::Unknown))
    }
}

struct CommandIo {
    stdin: DuplexStream,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

async fn write_all<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> bool {
    w.write_all(bytes).await.is_ok()
}

async fn run_command(post: &ExecPost, groups: &BTreeMap<String, u32>, io: &mut CommandIo) -> i32 {
    let argv: Vec<&str> = post.command.iter().map(String::as_str).collect();
    match argv.as_slice() {
        ["echo", rest @ ..] => {
            let line = format!("{}\n", rest.join(" "));
            if write_all(&mut io.stdout, line.as_bytes()).await { 0 } else { 1 }
        }
        ["cat"] => match copy(&mut io.stdin, &mut io.stdout).await {
            Ok(()) => 0,
            Err(_) => 1,
        },
        ["id", ..] => {
            let identity = &post.identity;
            let mut line = format!("uid={} gid={}", identity.uid(), identity.gid());
            let supplementary: Vec<String> = identity
                .group_mappings()
                .iter()
                .map(|m| m.container_id.to_string())
                .collect();
            if !supplementary.is_empty() {
                line.push_str(&format!(" groups={}", supplementary.join(",")));
            }
            line.push('\n');
            if write_all(&mut io.stdout, line.as_bytes()).await { 0 } else { 1 }
        }
        ["env"] => {
            let mut out = String::new();
            for (key, val) in &post.environment {
                out.push_str(&format!("{}={}\n", key, val));
            }
            if write_all(&mut io.stdout, out.as_bytes()).await { 0 } else { 1 }
        }
        ["getent", "group", name] => match groups.get(*name) {
            Some(gid) => {
                let line = format!("{}:x:{}:\n", name, gid);
                if write_all(&mut io.stdout, line.as_bytes()).await { 0 } else { 1 }
            }
            None => 2,
        },
        ["flood", bytes] => {
            let Ok(total) = bytes.parse::<usize>() else {
                let _ = write_all(&mut io.stderr, b"flood: invalid size\n").await;
                return 2;
            };
            let chunk = vec![b'x'; 1024];
            for stream in [&mut io.stdout, &mut io.stderr] {
                let mut left = total;
                while left > 0 {
                    let n = left.min(chunk.len());
                    if !write_all(stream, &chunk[..n]).await {
                        return 1;
                    }
                    left -= n;
                }
            }
            0
        }
        ["sleep", ..] => std::future::pending().await,
        ["true"] => 0,
        ["false"] => 1,
        ["exit", code] => code.parse().unwrap_or(2),
        [program, ..] => {
            let msg = format!("{}: command not found\n", program);
            let _ = write_all(&mut io.stderr, msg.as_bytes()).await;
            127
        }
        [] => 127,
    }
}

async fn copy<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
    }
}
