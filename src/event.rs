//! Inbound messages and the event decoder.
//!
//! Webhook payloads carry no explicit type tag, so an [`InboundMessage`] is
//! classified by trying each known payload shape in a fixed order and keeping
//! the first one whose key field is populated:
//!
//! ```text
//! 1. push shape          {"ref": "...", "repository": {"name": "..."}}
//! 2. pull-request shape  {"action": "...", "repository": {"name": "..."}}
//! 3. anything else       Unknown (raw payload kept for logging)
//! ```
//!
//! A payload carrying both a non-empty `ref` and a non-empty `action` is
//! always a push.

use serde::Deserialize;

/// A message received from the pub/sub transport.
///
/// Created once per notification and dropped after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel (subscription topic) the message arrived on
    pub channel: String,

    /// Raw event body, expected to be JSON
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, for log output
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Commits were pushed to a repository branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Full ref that was pushed, e.g. `refs/heads/master`
    pub git_ref: String,

    /// Repository name; may be empty, in which case the event can't be routed
    pub repository_name: String,
}

/// A pull request changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    /// What happened to the pull request, e.g. `opened` or `closed`
    pub action: String,

    pub repository_name: String,
}

/// The semantic type of an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    Push(PushEvent),
    PullRequest(PullRequestEvent),
    /// Neither known shape matched; the raw payload is kept for logging
    Unknown(Vec<u8>),
}

// Every field is optional so that explicit `null`s read like missing keys.
#[derive(Debug, Default, Deserialize)]
struct RepositoryShape {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushShape {
    #[serde(rename = "ref", default)]
    git_ref: Option<String>,

    #[serde(default)]
    repository: Option<RepositoryShape>,
}

#[derive(Debug, Deserialize)]
struct PullRequestShape {
    #[serde(default)]
    action: Option<String>,

    #[serde(default)]
    repository: Option<RepositoryShape>,
}

fn repository_name(repository: Option<RepositoryShape>) -> String {
    repository.and_then(|repo| repo.name).unwrap_or_default()
}

/// One attempt in the ordered decode sequence.
type ShapeAttempt = fn(&[u8]) -> Option<ClassifiedEvent>;

/// Shapes in precedence order.
const SHAPES: [ShapeAttempt; 2] = [try_push, try_pull_request];

fn try_push(payload: &[u8]) -> Option<ClassifiedEvent> {
    let shape: PushShape = serde_json::from_slice(payload).ok()?;
    let git_ref = shape.git_ref.filter(|r| !r.is_empty())?;
    Some(ClassifiedEvent::Push(PushEvent {
        git_ref,
        repository_name: repository_name(shape.repository),
    }))
}

fn try_pull_request(payload: &[u8]) -> Option<ClassifiedEvent> {
    let shape: PullRequestShape = serde_json::from_slice(payload).ok()?;
    let action = shape.action.filter(|a| !a.is_empty())?;
    Some(ClassifiedEvent::PullRequest(PullRequestEvent {
        action,
        repository_name: repository_name(shape.repository),
    }))
}

impl ClassifiedEvent {
    /// Classify a raw payload.
    ///
    /// Never fails: a payload that is not JSON, or that fits no known shape,
    /// becomes [`ClassifiedEvent::Unknown`].
    pub fn decode(payload: &[u8]) -> Self {
        SHAPES
            .iter()
            .find_map(|attempt| attempt(payload))
            .unwrap_or_else(|| ClassifiedEvent::Unknown(payload.to_vec()))
    }

    /// Short label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedEvent::Push(_) => "push",
            ClassifiedEvent::PullRequest(_) => "pull_request",
            ClassifiedEvent::Unknown(_) => "unknown",
        }
    }

    /// Repository the event refers to, if any
    pub fn repository_name(&self) -> Option<&str> {
        match self {
            ClassifiedEvent::Push(push) => Some(&push.repository_name),
            ClassifiedEvent::PullRequest(pr) => Some(&pr.repository_name),
            ClassifiedEvent::Unknown(_) => None,
        }
    }
}
