use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one relay connection.
///
/// Assigned on connect from a process-wide counter, so an identifier is never
/// reused for a later connection. There is no identity across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(u64);

impl ParticipantId {
    pub(crate) fn next() -> ParticipantId {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        ParticipantId(ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Deref for ParticipantId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_reused() {
        let a = ParticipantId::next();
        let b = ParticipantId::next();
        assert_ne!(a, b);
        assert!(*b > *a);
    }
}
