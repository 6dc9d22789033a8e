//! Client side of the controller sockets.
//!
//! One client holds a connection to each of the four channels. Push sends
//! are fire-and-forget writes; requests lock their channel for the full
//! write-then-read exchange, which is what makes request/reply strict
//! call-and-return from the caller's point of view.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::messages::{
    CtlPush, CtlReply, CtlRequest, ProgressEvent, SigPush, SigReply, SigRequest,
};
use super::SocketPorts;
use crate::signature::WorkflowRecord;
use crate::target::Target;

/// A JSON-lines framed connection.
struct JsonChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl JsonChannel {
    async fn connect(port: u16) -> std::io::Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    async fn send<T: Serialize>(&mut self, msg: &T) -> std::io::Result<()> {
        let mut line = serde_json::to_string(msg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await
    }

    async fn recv<T: DeserializeOwned>(&mut self) -> std::io::Result<T> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "controller closed the connection",
            ));
        }
        serde_json::from_str(line.trim_end())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Connected handles to all four controller channels.
pub struct ControllerClient {
    sig_push: Mutex<JsonChannel>,
    sig_req: Mutex<JsonChannel>,
    ctl_push: Mutex<JsonChannel>,
    ctl_req: Mutex<JsonChannel>,
}

impl ControllerClient {
    pub async fn connect(ports: &SocketPorts) -> std::io::Result<Self> {
        Ok(Self {
            sig_push: Mutex::new(JsonChannel::connect(ports.signature_push).await?),
            sig_req: Mutex::new(JsonChannel::connect(ports.signature_req).await?),
            ctl_push: Mutex::new(JsonChannel::connect(ports.controller_push).await?),
            ctl_req: Mutex::new(JsonChannel::connect(ports.controller_req).await?),
        })
    }

    pub async fn sig_push(&self, msg: SigPush) -> std::io::Result<()> {
        self.sig_push.lock().await.send(&msg).await
    }

    pub async fn sig_request(&self, msg: SigRequest) -> std::io::Result<SigReply> {
        let mut channel = self.sig_req.lock().await;
        channel.send(&msg).await?;
        channel.recv().await
    }

    pub async fn ctl_push(&self, msg: CtlPush) -> std::io::Result<()> {
        self.ctl_push.lock().await.send(&Some(msg)).await
    }

    /// Send the shutdown message: a literal `null` on the controller push
    /// channel.
    pub async fn shutdown(&self) -> std::io::Result<()> {
        self.ctl_push.lock().await.send(&Option::<CtlPush>::None).await
    }

    pub async fn ctl_request(&self, msg: CtlRequest) -> std::io::Result<CtlReply> {
        let mut channel = self.ctl_req.lock().await;
        channel.send(&msg).await?;
        channel.recv().await
    }

    pub async fn push_target_signature(
        &self,
        target: Target,
        signature: impl Into<String>,
    ) -> std::io::Result<()> {
        self.sig_push(SigPush::Target {
            target,
            signature: signature.into(),
        })
        .await
    }

    pub async fn push_step_signature(
        &self,
        key: impl Into<String>,
        substep: u32,
        signature: impl Into<String>,
    ) -> std::io::Result<()> {
        self.sig_push(SigPush::Step {
            key: key.into(),
            substep,
            signature: signature.into(),
        })
        .await
    }

    pub async fn push_workflow_record(
        &self,
        id: impl Into<String>,
        record: WorkflowRecord,
    ) -> std::io::Result<()> {
        self.sig_push(SigPush::Workflow {
            id: id.into(),
            record,
        })
        .await
    }

    pub async fn target_signature(&self, target: &Target) -> std::io::Result<Option<String>> {
        match self
            .sig_request(SigRequest::TargetGet {
                target: target.clone(),
            })
            .await?
        {
            SigReply::Signature(sig) => Ok(sig),
            _ => Ok(None),
        }
    }

    pub async fn step_signature(
        &self,
        key: &str,
        substep: u32,
    ) -> std::io::Result<Option<String>> {
        match self
            .sig_request(SigRequest::StepGet {
                key: key.to_string(),
                substep,
            })
            .await?
        {
            SigReply::Signature(sig) => Ok(sig),
            _ => Ok(None),
        }
    }

    pub async fn set_nprocs(&self, n: usize) -> std::io::Result<()> {
        self.ctl_push(CtlPush::Nprocs(n)).await
    }

    pub async fn nprocs(&self) -> std::io::Result<CtlReply> {
        self.ctl_request(CtlRequest::Nprocs).await
    }

    pub async fn push_progress(
        &self,
        event: ProgressEvent,
        step: impl Into<String>,
    ) -> std::io::Result<()> {
        self.ctl_push(CtlPush::Progress {
            event,
            step: step.into(),
        })
        .await
    }
}
