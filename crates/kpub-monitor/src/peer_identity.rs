use std::fmt;

/// Registry key for a chat, derived from the protocol's address spaces.
///
/// Users and basic groups arrive as ordinary message updates; channels and
/// supergroups arrive as channel-message updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerIdentity {
    User(i64),
    Group(i64),
    Channel(i64),
}

impl PeerIdentity {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Channel(_))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "u{id}"),
            Self::Group(id) => write!(f, "g{id}"),
            Self::Channel(id) => write!(f, "c{id}"),
        }
    }
}
