//! Incremental rolling-mean indicator
//!
//! O(1) per tick over a fixed-capacity circular buffer: append until full,
//! then replace the oldest sample while adjusting a running sum. The
//! classifier only trusts the average once the window is full.

#[derive(Debug, Clone)]
pub struct RollingMean {
    buf: Vec<f64>,
    capacity: usize,
    /// Index of the oldest sample once the buffer is full
    head: usize,
    sum: f64,
}

impl RollingMean {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "rolling mean needs capacity >= 1");
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            sum: 0.0,
        }
    }

    /// Push a price and return the new average
    pub fn add(&mut self, price: f64) -> f64 {
        if self.buf.len() < self.capacity {
            self.buf.push(price);
            self.sum += price;
        } else {
            self.sum -= self.buf[self.head];
            self.buf[self.head] = price;
            self.sum += price;
            self.head = (self.head + 1) % self.capacity;
        }
        self.average()
    }

    pub fn average(&self) -> f64 {
        if self.buf.is_empty() {
            0.0
        } else {
            self.sum / self.buf.len() as f64
        }
    }

    /// Whether the window holds enough samples to be meaningful
    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Warm-start from a historical sequence, oldest first.
    /// Only the trailing `capacity` values end up in the window.
    pub fn seed(&mut self, prices: &[f64]) {
        self.reset();
        for &p in prices {
            self.add(p);
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_tracks_partial_window() {
        let mut ma = RollingMean::new(4);
        assert_eq!(ma.add(2.0), 2.0);
        assert_eq!(ma.add(4.0), 3.0);
        assert!(!ma.is_full());
    }

    #[test]
    fn full_window_replaces_oldest() {
        let mut ma = RollingMean::new(3);
        ma.add(1.0);
        ma.add(2.0);
        ma.add(3.0);
        assert!(ma.is_full());
        // 1.0 drops out
        let avg = ma.add(4.0);
        assert!((avg - 3.0).abs() < 1e-12);
        // 2.0 drops out
        let avg = ma.add(5.0);
        assert!((avg - 4.0).abs() < 1e-12);
    }

    #[test]
    fn seed_keeps_trailing_capacity() {
        let mut ma = RollingMean::new(3);
        ma.seed(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert!(ma.is_full());
        assert!((ma.average() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn replay_is_deterministic() {
        let ticks: Vec<f64> = (0..500).map(|i| 100.0 + ((i * 7) % 13) as f64 * 0.01).collect();
        let mut a = RollingMean::new(12);
        let mut b = RollingMean::new(12);
        let seq_a: Vec<f64> = ticks.iter().map(|&p| a.add(p)).collect();
        let seq_b: Vec<f64> = ticks.iter().map(|&p| b.add(p)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn reset_clears_everything() {
        let mut ma = RollingMean::new(2);
        ma.add(5.0);
        ma.add(6.0);
        ma.reset();
        assert_eq!(ma.len(), 0);
        assert_eq!(ma.average(), 0.0);
    }
}
