use std::collections::HashSet;

/// A contained configuration problem: the subtree at `path` renders nothing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub path: String,
    pub message: String,
}

/// Report-once sink for configuration errors.
///
/// Resolution runs on every change, so the same malformed subtree is seen
/// over and over; only the first sighting is logged and recorded.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    seen: HashSet<Diagnostic>,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem. Returns false when it was already reported.
    pub fn report(&mut self, path: impl Into<String>, message: impl Into<String>) -> bool {
        let diag = Diagnostic {
            path: path.into(),
            message: message.into(),
        };
        if self.seen.contains(&diag) {
            return false;
        }
        tracing::warn!(path = %diag.path, "form configuration error: {}", diag.message);
        self.seen.insert(diag.clone());
        self.entries.push(diag);
        true
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn absorb(&mut self, other: Diagnostics) {
        for d in other.entries {
            self.report(d.path, d.message);
        }
    }
}
