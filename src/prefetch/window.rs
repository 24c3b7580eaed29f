//! Pure state-machine logic for sequentiality detection and window growth,
//! split out from the handle so it can be unit tested without any I/O.

/// How a handle's access pattern has been classified so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Probing,
    Sequential,
    Random,
}

/// Tolerance (bytes) for treating a read as "adjacent" to the previous one,
/// to absorb small kernel read-size jitter around page boundaries.
const ADJACENCY_TOLERANCE: u64 = 4096;

#[derive(Debug)]
pub struct SequentialityDetector {
    state: DetectorState,
    last_read_offset: Option<u64>,
    last_read_len: u64,
}

impl SequentialityDetector {
    pub fn new() -> Self {
        Self {
            state: DetectorState::Probing,
            last_read_offset: None,
            last_read_len: 0,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Observes a read at `offset`; call [`Self::record_served`] afterward
    /// with the length actually returned so the next observation has a
    /// prediction to compare against.
    pub fn observe(&mut self, offset: u64) -> DetectorState {
        if let Some(prev_offset) = self.last_read_offset {
            let predicted = prev_offset + self.last_read_len;
            let lower = predicted.saturating_sub(ADJACENCY_TOLERANCE);
            let upper = predicted.saturating_add(ADJACENCY_TOLERANCE);
            self.state = if offset >= lower && offset <= upper {
                DetectorState::Sequential
            } else {
                DetectorState::Random
            };
        }
        self.state
    }

    pub fn record_served(&mut self, offset: u64, len: u64) {
        self.last_read_offset = Some(offset);
        self.last_read_len = len;
    }
}

impl Default for SequentialityDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The sliding prefetch window: the next range to speculatively fetch.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub offset: u64,
    pub bytes: u64,
}

impl Window {
    pub fn new(start_offset: u64, initial_bytes: u64) -> Self {
        Self {
            offset: start_offset,
            bytes: initial_bytes,
        }
    }

    /// Advances past the just-completed fetch and doubles the window size,
    /// capped at `max_bytes`, per spec.md §4.2 step 3.
    pub fn advance_and_double(&mut self, max_bytes: u64) {
        self.offset += self.bytes;
        self.bytes = (self.bytes * 2).min(max_bytes).max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_read_stays_probing() {
        let mut d = SequentialityDetector::new();
        assert_eq!(d.observe(0), DetectorState::Probing);
        d.record_served(0, 4096);
    }

    #[test]
    fn adjacent_reads_become_sequential() {
        let mut d = SequentialityDetector::new();
        d.observe(0);
        d.record_served(0, 4096);
        assert_eq!(d.observe(4096), DetectorState::Sequential);
        d.record_served(4096, 4096);
        assert_eq!(d.observe(8192), DetectorState::Sequential);
    }

    #[test]
    fn backward_jump_becomes_random() {
        let mut d = SequentialityDetector::new();
        d.observe(8192);
        d.record_served(8192, 4096);
        assert_eq!(d.observe(0), DetectorState::Random);
    }

    #[test]
    fn window_doubles_up_to_max() {
        let mut w = Window::new(0, 1024);
        w.advance_and_double(4096);
        assert_eq!(w.bytes, 2048);
        w.advance_and_double(4096);
        assert_eq!(w.bytes, 4096);
        w.advance_and_double(4096);
        assert_eq!(w.bytes, 4096);
    }
}
