//! The signature controller actor.
//!
//! One long-lived task owns the three signature stores and a progress
//! display. It is reachable only through four loopback TCP sockets bound to
//! random ports at start: two fire-and-forget push channels and two strict
//! request/reply channels. Connections are fanned into per-channel queues;
//! each actor cycle drains every ready push message before serving at most
//! one request per request channel, so a sender's push is visible to its
//! own follow-up request.

pub mod client;
pub mod messages;

use std::collections::HashMap;
use std::io::Write as _;
use std::time::{Duration, Instant};

use console::style;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::signature::{StepSignatures, TargetSignatures, WorkflowSignatures};
use self::messages::{
    CtlPush, CtlReply, CtlRequest, ProgressEvent, SigPush, SigReply, SigRequest, StepOutcome,
};

/// Ports of the four controller sockets, published after binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketPorts {
    pub signature_push: u16,
    pub signature_req: u16,
    pub controller_push: u16,
    pub controller_req: u16,
}

/// Handle to a started controller.
pub struct ControllerHandle {
    pub ports: SocketPorts,
    join: JoinHandle<()>,
}

impl ControllerHandle {
    /// Wait for the actor to shut down.
    pub async fn wait(self) {
        let _ = self.join.await;
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

/// The controller state: the three stores, the advertised worker count,
/// and per-step progress tallies.
pub struct Controller {
    target_signatures: TargetSignatures,
    step_signatures: StepSignatures,
    workflow_signatures: WorkflowSignatures,
    nprocs: usize,
    completed: HashMap<String, u64>,
    ignored: HashMap<String, u64>,
    progress: ProgressDisplay,
}

impl Controller {
    pub fn new(verbosity: u8) -> Self {
        Self {
            target_signatures: TargetSignatures::default(),
            step_signatures: StepSignatures::default(),
            workflow_signatures: WorkflowSignatures::default(),
            nprocs: 0,
            completed: HashMap::new(),
            ignored: HashMap::new(),
            progress: ProgressDisplay::new(verbosity == 1),
        }
    }

    /// Bind the four sockets and spawn the actor.
    ///
    /// This is the ready barrier: once `start` returns, all four ports are
    /// listening and traffic may be issued.
    pub async fn start(self) -> std::io::Result<ControllerHandle> {
        let sig_push_listener = TcpListener::bind("127.0.0.1:0").await?;
        let sig_req_listener = TcpListener::bind("127.0.0.1:0").await?;
        let ctl_push_listener = TcpListener::bind("127.0.0.1:0").await?;
        let ctl_req_listener = TcpListener::bind("127.0.0.1:0").await?;
        let ports = SocketPorts {
            signature_push: sig_push_listener.local_addr()?.port(),
            signature_req: sig_req_listener.local_addr()?.port(),
            controller_push: ctl_push_listener.local_addr()?.port(),
            controller_req: ctl_req_listener.local_addr()?.port(),
        };
        debug!(?ports, "controller sockets bound");

        let (sig_push_tx, sig_push_rx) = mpsc::channel::<SigPush>(256);
        let (sig_req_tx, sig_req_rx) =
            mpsc::channel::<(SigRequest, oneshot::Sender<SigReply>)>(64);
        let (ctl_push_tx, ctl_push_rx) = mpsc::channel::<Option<CtlPush>>(256);
        let (ctl_req_tx, ctl_req_rx) = mpsc::channel::<(CtlRequest, oneshot::Sender<CtlReply>)>(64);

        let accept_tasks = vec![
            tokio::spawn(accept_push(sig_push_listener, sig_push_tx)),
            tokio::spawn(accept_request(sig_req_listener, sig_req_tx)),
            tokio::spawn(accept_push(ctl_push_listener, ctl_push_tx)),
            tokio::spawn(accept_request(ctl_req_listener, ctl_req_tx)),
        ];

        let join = tokio::spawn(async move {
            self.run(sig_push_rx, sig_req_rx, ctl_push_rx, ctl_req_rx).await;
            for task in accept_tasks {
                task.abort();
            }
            debug!("controller shut down");
        });

        Ok(ControllerHandle { ports, join })
    }

    async fn run(
        mut self,
        mut sig_push_rx: mpsc::Receiver<SigPush>,
        mut sig_req_rx: mpsc::Receiver<(SigRequest, oneshot::Sender<SigReply>)>,
        mut ctl_push_rx: mpsc::Receiver<Option<CtlPush>>,
        mut ctl_req_rx: mpsc::Receiver<(CtlRequest, oneshot::Sender<CtlReply>)>,
    ) {
        self.progress.banner();
        'poll: loop {
            // Drain every ready push before touching the request channels.
            while let Ok(msg) = sig_push_rx.try_recv() {
                self.handle_sig_push(msg);
            }
            loop {
                match ctl_push_rx.try_recv() {
                    Ok(Some(msg)) => self.handle_ctl_push(msg),
                    Ok(None) => break 'poll,
                    Err(_) => break,
                }
            }

            tokio::select! {
                Some(msg) = sig_push_rx.recv() => self.handle_sig_push(msg),
                Some((req, reply)) = sig_req_rx.recv() => {
                    // a sender's earlier pushes must be visible to its reply
                    while let Ok(msg) = sig_push_rx.try_recv() {
                        self.handle_sig_push(msg);
                    }
                    let _ = reply.send(self.handle_sig_req(req));
                }
                Some(msg) = ctl_push_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_ctl_push(msg),
                        None => break 'poll,
                    }
                }
                Some((req, reply)) = ctl_req_rx.recv() => {
                    loop {
                        match ctl_push_rx.try_recv() {
                            Ok(Some(msg)) => self.handle_ctl_push(msg),
                            Ok(None) => break 'poll,
                            Err(_) => break,
                        }
                    }
                    let _ = reply.send(self.handle_ctl_req(req));
                }
                else => break 'poll,
            }
        }
    }

    fn handle_sig_push(&mut self, msg: SigPush) {
        match msg {
            SigPush::Workflow { id, record } => self.workflow_signatures.write(id, record),
            SigPush::Target { target, signature } => {
                self.target_signatures.set(target, signature)
            }
            SigPush::Step {
                key,
                substep,
                signature,
            } => self.step_signatures.set(key, substep, signature),
        }
    }

    fn handle_sig_req(&mut self, req: SigRequest) -> SigReply {
        match req {
            SigRequest::WorkflowClear => {
                self.workflow_signatures.clear();
                SigReply::Ok
            }
            SigRequest::WorkflowPlaceholders { id } => {
                SigReply::Placeholders(self.workflow_signatures.placeholders(&id))
            }
            SigRequest::WorkflowRecords { id } => {
                SigReply::Records(self.workflow_signatures.records(&id))
            }
            SigRequest::TargetGet { target } => {
                SigReply::Signature(self.target_signatures.get(&target))
            }
            SigRequest::StepGet { key, substep } => {
                SigReply::Signature(self.step_signatures.get(&key, substep))
            }
        }
    }

    fn handle_ctl_push(&mut self, msg: CtlPush) {
        match msg {
            CtlPush::Nprocs(n) => {
                debug!(nprocs = n, "active process count updated");
                self.nprocs = n;
            }
            CtlPush::Progress { event, step } => {
                match event {
                    ProgressEvent::SubstepIgnored => {
                        *self.ignored.entry(step).or_default() += 1;
                        self.progress.substep(true);
                    }
                    ProgressEvent::SubstepCompleted => {
                        *self.completed.entry(step).or_default() += 1;
                        self.progress.substep(false);
                    }
                    ProgressEvent::StepCompleted(outcome) => {
                        self.progress.step(outcome);
                    }
                    ProgressEvent::Done => {
                        let steps = self
                            .completed
                            .keys()
                            .chain(self.ignored.keys())
                            .collect::<std::collections::HashSet<_>>()
                            .len();
                        let completed: u64 = self.completed.values().sum();
                        let ignored: u64 = self.ignored.values().sum();
                        self.progress.done(steps, completed, ignored);
                    }
                }
            }
        }
    }

    fn handle_ctl_req(&mut self, req: CtlRequest) -> CtlReply {
        match req {
            CtlRequest::Nprocs => CtlReply::Nprocs(self.nprocs),
        }
    }
}

/// Accept loop for a push socket: every connection's lines are parsed and
/// fanned into one queue. Malformed messages are logged and dropped; a
/// signature fault never stops the controller.
async fn accept_push<T>(listener: TcpListener, tx: mpsc::Sender<T>)
where
    T: DeserializeOwned + Send + 'static,
{
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            break;
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<T>(&line) {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("discarding malformed push message: {}", err),
                }
            }
        });
    }
}

/// Accept loop for a request socket: strict read-one, reply-one per
/// connection. A failed request is answered with `null`.
async fn accept_request<Req, Rep>(listener: TcpListener, tx: mpsc::Sender<(Req, oneshot::Sender<Rep>)>)
where
    Req: DeserializeOwned + Send + 'static,
    Rep: Serialize + Send + 'static,
{
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            break;
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match serde_json::from_str::<Req>(&line) {
                    Ok(req) => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        if tx.send((req, reply_tx)).await.is_err() {
                            break;
                        }
                        match reply_rx.await {
                            Ok(reply) => serde_json::to_string(&reply)
                                .unwrap_or_else(|_| "null".to_string()),
                            Err(_) => "null".to_string(),
                        }
                    }
                    Err(err) => {
                        warn!("failed to respond to request: {}", err);
                        "null".to_string()
                    }
                };
                if write_half
                    .write_all(format!("{}\n", reply).as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }
}

/// The verbosity-1 terminal progress bar: a `[` banner, a run of dots for
/// substeps that collapses into one coloured `#` per completed step, and a
/// closing `]` with a summary line.
struct ProgressDisplay {
    enabled: bool,
    cells: usize,
    count: usize,
    last_update: Option<Instant>,
}

impl ProgressDisplay {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            cells: 25,
            count: 0,
            last_update: None,
        }
    }

    fn banner(&self) {
        if self.enabled {
            eprint!("{}", style("[").green());
            let _ = std::io::stderr().flush();
        }
    }

    fn substep(&mut self, ignored: bool) {
        if !self.enabled {
            return;
        }
        // redraw at most once a second
        if let Some(last) = self.last_update {
            if last.elapsed() < Duration::from_secs(1) {
                return;
            }
        }
        if self.count == self.cells {
            self.erase();
        }
        let dot = if ignored {
            style(".").dim()
        } else {
            style(".").green()
        };
        eprint!("{}", dot);
        self.count += 1;
        self.last_update = Some(Instant::now());
        let _ = std::io::stderr().flush();
    }

    fn step(&mut self, outcome: StepOutcome) {
        if !self.enabled {
            return;
        }
        self.erase();
        let mark = match outcome {
            StepOutcome::Skipped => style("#").dim(),
            StepOutcome::Executed => style("#").green(),
            StepOutcome::Partial => style("#").cyan(),
            StepOutcome::Untracked => style("#").yellow(),
        };
        eprint!("{}", mark);
        let _ = std::io::stderr().flush();
    }

    fn done(&mut self, steps: usize, completed: u64, ignored: u64) {
        if !self.enabled {
            return;
        }
        self.erase();
        let mut summary = format!("{} step{} processed", steps, plural(steps as u64));
        let mut details = Vec::new();
        if completed > 0 {
            details.push(format!("{} job{} completed", completed, plural(completed)));
        }
        if ignored > 0 {
            details.push(format!("{} job{} ignored", ignored, plural(ignored)));
        }
        if !details.is_empty() {
            summary.push_str(&format!(" ({})", details.join(", ")));
        }
        eprintln!("{} {}", style("]").green(), summary);
        let _ = std::io::stderr().flush();
    }

    fn erase(&mut self) {
        if self.count > 0 {
            eprint!("{}", "\u{8} \u{8}".repeat(self.count));
            self.count = 0;
        }
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 { "" } else { "s" }
}
