use tracing::{debug, warn};

/// Reassembles one chunked utterance
///
/// Fragments are opaque slices of a single base64 payload and are only
/// meaningful once concatenated, so nothing is decoded until the utterance
/// completes. At most one utterance is open at a time.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    fragments: Vec<String>,
    open: bool,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new utterance, discarding any stale partial buffer
    pub fn begin_utterance(&mut self) {
        if !self.fragments.is_empty() {
            warn!(
                "Discarding {} stale fragments from an unfinished utterance",
                self.fragments.len()
            );
        }
        self.fragments.clear();
        self.open = true;
    }

    /// Append a fragment in arrival order
    ///
    /// A fragment without a preceding utterance start opens one implicitly.
    pub fn push_fragment(&mut self, fragment: &str) {
        if !self.open {
            debug!("Fragment arrived without utterance start, opening one");
            self.open = true;
        }
        self.fragments.push(fragment.to_string());
    }

    /// Close the utterance and hand back its fragments in arrival order
    ///
    /// Returns `None` if nothing was buffered.
    pub fn complete_utterance(&mut self) -> Option<Vec<String>> {
        self.open = false;

        if self.fragments.is_empty() {
            return None;
        }

        debug!("Utterance complete: {} fragments", self.fragments.len());

        Some(std::mem::take(&mut self.fragments))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}
