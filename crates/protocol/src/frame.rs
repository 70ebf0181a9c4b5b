use std::fmt;

use crate::constants::{CLIENT_DISCONNECT_TAG, CONNECT_TAG, MESSAGE_TAG, SERVER_DISCONNECT_TAG};

/// Kind of a frame, carried on the wire as a suffix tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Client identifies itself; payload is the display name.
    Connect,
    /// Client chat line; payload is `"name: text"`.
    Chat,
    /// Untagged line relayed by the server (chat, join/leave notices).
    Relay,
    /// Client farewell, or the server's acknowledgment of one.
    ClientDisconnect,
    /// Server-wide shutdown notice.
    ServerShutdown,
}

/// Tags ordered longest first so suffix matching prefers the longest tag.
const TAGGED_KINDS: [FrameKind; 4] = [
    FrameKind::ClientDisconnect,
    FrameKind::ServerShutdown,
    FrameKind::Connect,
    FrameKind::Chat,
];

impl FrameKind {
    /// Suffix tag for this kind (empty for [`FrameKind::Relay`]).
    pub fn tag(self) -> &'static str {
        match self {
            FrameKind::Connect => CONNECT_TAG,
            FrameKind::Chat => MESSAGE_TAG,
            FrameKind::Relay => "",
            FrameKind::ClientDisconnect => CLIENT_DISCONNECT_TAG,
            FrameKind::ServerShutdown => SERVER_DISCONNECT_TAG,
        }
    }

    /// Splits an undelimited frame body into its kind and payload.
    ///
    /// A body matching no known tag is a bare relay line.
    pub fn classify(body: &str) -> (FrameKind, &str) {
        TAGGED_KINDS
            .iter()
            .find_map(|kind| body.strip_suffix(kind.tag()).map(|p| (*kind, p)))
            .unwrap_or((FrameKind::Relay, body))
    }
}

/// One decoded application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: String,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn connect(name: impl Into<String>) -> Self {
        Self::new(FrameKind::Connect, name)
    }

    pub fn chat(line: impl Into<String>) -> Self {
        Self::new(FrameKind::Chat, line)
    }

    pub fn relay(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Relay, text)
    }

    pub fn client_disconnect(text: impl Into<String>) -> Self {
        Self::new(FrameKind::ClientDisconnect, text)
    }

    pub fn server_shutdown(text: impl Into<String>) -> Self {
        Self::new(FrameKind::ServerShutdown, text)
    }

    /// Payload with its tag restored, without the delimiter.
    pub fn body(&self) -> String {
        format!("{}{}", self.payload, self.kind.tag())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.kind, self.payload)
    }
}
