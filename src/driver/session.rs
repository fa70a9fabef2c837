//! Opaque session handle.

use std::fmt;

/// A session started by a [`Client`](super::Client).
///
/// Repositories thread it through to the backend without inspecting it;
/// acquiring and ending sessions is the caller's job.
pub struct Session {
    id: u64,
    inner: SessionInner,
}

enum SessionInner {
    Detached,
    #[cfg(feature = "mongodb")]
    Mongo(Box<mongodb::ClientSession>),
}

impl Session {
    /// A session with no backend state. Used by the in-memory store.
    pub(crate) fn detached(id: u64) -> Self {
        Self {
            id,
            inner: SessionInner::Detached,
        }
    }

    #[cfg(feature = "mongodb")]
    pub(crate) fn mongo(id: u64, session: mongodb::ClientSession) -> Self {
        Self {
            id,
            inner: SessionInner::Mongo(Box::new(session)),
        }
    }

    #[cfg(feature = "mongodb")]
    pub(crate) fn as_mongo(&mut self) -> Option<&mut mongodb::ClientSession> {
        match &mut self.inner {
            SessionInner::Mongo(session) => Some(session.as_mut()),
            SessionInner::Detached => None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            SessionInner::Detached => "detached",
            #[cfg(feature = "mongodb")]
            SessionInner::Mongo(_) => "mongo",
        };
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}
