use crate::utils::bbox::BoundingBox;
use std::sync::Mutex;

/// Transient overlay marking a recognized vehicle
///
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub text: String,
    pub expires_at_ms: u64,
}

/// Highlights shown for a short time after a successful plate reading
///
#[derive(Debug, Default)]
pub struct HighlightBoard {
    items: Mutex<Vec<Highlight>>,
}

impl HighlightBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a highlight visible for `duration_ms`, expired ones are dropped
    ///
    pub fn add(&self, track_id: u64, bbox: BoundingBox, text: &str, now_ms: u64, duration_ms: u64) {
        let mut items = self.items.lock().unwrap();
        items.retain(|h| h.expires_at_ms > now_ms);
        items.push(Highlight {
            track_id,
            bbox,
            text: text.to_string(),
            expires_at_ms: now_ms.saturating_add(duration_ms),
        });
    }

    /// Highlights still visible at `now_ms`, expired ones are dropped
    ///
    pub fn active(&self, now_ms: u64) -> Vec<Highlight> {
        let mut items = self.items.lock().unwrap();
        items.retain(|h| h.expires_at_ms > now_ms);
        items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::capture::highlight::HighlightBoard;
    use crate::utils::bbox::BoundingBox;

    #[test]
    fn highlights_expire() {
        let board = HighlightBoard::new();
        board.add(1, BoundingBox::new(0.0, 0.0, 1.0, 1.0), "AB1234", 100, 1_000);
        board.add(2, BoundingBox::new(5.0, 0.0, 1.0, 1.0), "XY9876", 600, 1_000);
        assert_eq!(board.active(500).len(), 2);
        let left = board.active(1_100);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].track_id, 2);
        board.clear();
        assert!(board.active(0).is_empty());
    }

    #[test]
    fn adding_drops_expired_highlights() {
        let board = HighlightBoard::new();
        for i in 0..100 {
            board.add(i, BoundingBox::new(0.0, 0.0, 1.0, 1.0), "AB1234", i * 2_000, 1_000);
        }
        assert_eq!(board.len(), 1);
        assert_eq!(board.active(198_500)[0].track_id, 99);
        assert!(board.active(199_000).is_empty());
        assert!(board.is_empty());
    }
}
