//! Request arguments for linker operations.
//!
//! `gid`/`nid` set means direct addressing; `None` means the target is
//! resolved through the location cache.

use common::{Message, SessionKind};

#[derive(Debug, Clone)]
pub struct PushArgs {
    pub gid: Option<String>,
    pub kind: SessionKind,
    pub target: i64,
    pub message: Message,
}

#[derive(Debug, Clone)]
pub struct MulticastArgs {
    pub gid: Option<String>,
    pub kind: SessionKind,
    pub targets: Vec<i64>,
    pub message: Message,
    /// Wait for per-target confirmation; otherwise sends run detached.
    pub ack: bool,
}

#[derive(Debug, Clone)]
pub struct BroadcastArgs {
    pub kind: SessionKind,
    pub message: Message,
    pub ack: bool,
}

#[derive(Debug, Clone)]
pub struct PublishArgs {
    pub channel: String,
    pub message: Message,
    pub ack: bool,
}

/// Addressing shared by get-ip, is-online and disconnect.
#[derive(Debug, Clone)]
pub struct SessionArgs {
    pub gid: Option<String>,
    pub kind: SessionKind,
    pub target: i64,
}

#[derive(Debug, Clone)]
pub struct DisconnectArgs {
    pub gid: Option<String>,
    pub kind: SessionKind,
    pub target: i64,
    /// Close immediately instead of after pending writes drain.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct SubscribeArgs {
    pub gid: Option<String>,
    pub kind: SessionKind,
    pub targets: Vec<i64>,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct DeliverArgs {
    pub nid: Option<String>,
    pub cid: i64,
    pub uid: i64,
    pub message: Message,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerArgs {
    pub event: i32,
    pub cid: i64,
    pub uid: i64,
}

/// Treats an empty id the same as an absent one.
pub(crate) fn direct(id: &Option<String>) -> Option<&str> {
    id.as_deref().filter(|id| !id.is_empty())
}
