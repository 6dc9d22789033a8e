//! Wire messages for the controller's four channels.
//!
//! Framing is one JSON value per line. Enums serialize externally tagged,
//! so the variant name is the leading kind-string of each message. Shutdown
//! is the literal JSON `null` on the controller push channel, which is why
//! that channel carries `Option<CtlPush>`.

use serde::{Deserialize, Serialize};

use crate::signature::WorkflowRecord;
use crate::target::Target;

/// Fire-and-forget signature writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigPush {
    Workflow { id: String, record: WorkflowRecord },
    Target { target: Target, signature: String },
    Step { key: String, substep: u32, signature: String },
}

/// Signature queries; every request gets exactly one reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigRequest {
    WorkflowClear,
    WorkflowPlaceholders { id: String },
    WorkflowRecords { id: String },
    TargetGet { target: Target },
    StepGet { key: String, substep: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigReply {
    Ok,
    Records(Vec<WorkflowRecord>),
    Placeholders(Vec<String>),
    Signature(Option<String>),
    /// The controller could not serve the request; it never propagates
    /// signature faults.
    Null,
}

/// Progress event kinds pushed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    SubstepIgnored,
    SubstepCompleted,
    StepCompleted(StepOutcome),
    Done,
}

/// How a whole step finished, encoded as the colour of its progress mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Signature matched; nothing re-executed (dim).
    Skipped,
    /// Fully re-executed (green).
    Executed,
    /// Some substeps re-executed, some ignored (cyan).
    Partial,
    /// No signature support (yellow).
    Untracked,
}

/// Fire-and-forget controller messages. `None` on the wire (JSON `null`)
/// shuts the controller down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtlPush {
    Nprocs(usize),
    Progress { event: ProgressEvent, step: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtlRequest {
    Nprocs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtlReply {
    Nprocs(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_leads_the_message() {
        let msg = SigPush::Target {
            target: Target::file("foo"),
            signature: "sig1".to_string(),
        };
        let wire = serde_json::to_string(&msg).unwrap();
        assert!(wire.starts_with("{\"target\""), "unexpected framing: {}", wire);
        let back: SigPush = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_null_is_shutdown() {
        let msg: Option<CtlPush> = serde_json::from_str("null").unwrap();
        assert!(msg.is_none());
        let msg: Option<CtlPush> = serde_json::from_str(
            &serde_json::to_string(&Some(CtlPush::Nprocs(4))).unwrap(),
        )
        .unwrap();
        assert_eq!(msg, Some(CtlPush::Nprocs(4)));
    }

    #[test]
    fn test_request_reply_roundtrip() {
        let req = SigRequest::StepGet {
            key: "human_1".to_string(),
            substep: 0,
        };
        let wire = serde_json::to_string(&req).unwrap();
        let back: SigRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, req);

        let reply = SigReply::Signature(Some("abc".to_string()));
        let wire = serde_json::to_string(&reply).unwrap();
        let back: SigReply = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, reply);
    }
}
