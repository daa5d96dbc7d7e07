//! Notices delivered by the write-side collaborator.
//!
//! A notice describes something that happened to a bout or a message.
//! Functors subscribe to notice kinds and translate them into attribute
//! updates. Delivery is at-least-once, so every handler must be idempotent.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::RecordId;

/// A bout (conversation) as carried by notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bout {
    /// Unique bout number
    pub number: u64,

    /// Current title
    #[serde(default)]
    pub title: String,

    /// Identity names of all participants
    #[serde(default)]
    pub participants: Vec<String>,
}

impl Bout {
    /// Create a bout without participants.
    pub fn new(number: u64, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            participants: Vec::new(),
        }
    }

    /// Add participants.
    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participants = participants.into_iter().map(Into::into).collect();
        self
    }
}

/// A message as carried by notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message number, the record id of the index
    pub number: RecordId,

    /// Number of the bout this message belongs to
    pub bout: u64,

    /// Identity name of the author
    pub author: String,

    /// Message text
    #[serde(default)]
    pub text: String,

    /// When the message was posted
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
}

impl Message {
    /// Create a message posted now.
    pub fn new(number: RecordId, bout: u64, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            number,
            bout,
            author: author.into(),
            text: text.into(),
            date: Utc::now(),
        }
    }

    /// Set the date.
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }
}

/// Kind of a notice, used as the dispatch key of functor handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A new message was posted
    MessagePosted,
    /// A message was seen by an identity
    MessageSeen,
    /// A bout got a new title
    BoutRenamed,
    /// An identity joined a bout
    ParticipantJoined,
    /// An identity was removed from a bout
    ParticipantKickedOff,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeKind::MessagePosted => write!(f, "message-posted"),
            NoticeKind::MessageSeen => write!(f, "message-seen"),
            NoticeKind::BoutRenamed => write!(f, "bout-renamed"),
            NoticeKind::ParticipantJoined => write!(f, "participant-joined"),
            NoticeKind::ParticipantKickedOff => write!(f, "participant-kicked-off"),
        }
    }
}

/// A domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A message was posted into a bout
    MessagePosted {
        /// The new message
        message: Message,
        /// The bout it was posted into
        bout: Bout,
    },
    /// A message was seen by an identity
    MessageSeen {
        /// The message
        message: Message,
        /// Who has seen it
        identity: String,
    },
    /// A bout was renamed
    BoutRenamed {
        /// The bout, carrying its new title
        bout: Bout,
    },
    /// An identity joined a bout
    ParticipantJoined {
        /// The bout
        bout: Bout,
        /// Who joined
        identity: String,
    },
    /// An identity was kicked off a bout
    ParticipantKickedOff {
        /// The bout
        bout: Bout,
        /// Who left
        identity: String,
    },
}

impl Notice {
    /// The dispatch key of this notice.
    pub fn kind(&self) -> NoticeKind {
        match self {
            Notice::MessagePosted { .. } => NoticeKind::MessagePosted,
            Notice::MessageSeen { .. } => NoticeKind::MessageSeen,
            Notice::BoutRenamed { .. } => NoticeKind::BoutRenamed,
            Notice::ParticipantJoined { .. } => NoticeKind::ParticipantJoined,
            Notice::ParticipantKickedOff { .. } => NoticeKind::ParticipantKickedOff,
        }
    }

    /// The record this notice is about, if it is about a single message.
    pub fn record(&self) -> Option<RecordId> {
        match self {
            Notice::MessagePosted { message, .. } | Notice::MessageSeen { message, .. } => {
                Some(message.number)
            }
            _ => None,
        }
    }

    /// Serialize notice to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize notice from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
