use skywave_core::config::FreqRange;
use skywave_core::protocol::ScannerChannel;

/// One stop on the sweep: either a grid slice center or a priority
/// channel visit.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepStep {
    Slice { center_hz: u64 },
    Priority { channel: ScannerChannel },
}

impl SweepStep {
    pub fn center_hz(&self) -> u64 {
        match self {
            Self::Slice { center_hz } => *center_hz,
            Self::Priority { channel } => channel.frequency_hz,
        }
    }
}

/// Builds the grid of slice centers: each range is walked in increments of
/// one device bandwidth, tuning to the midpoint of each slice. Ranges
/// shorter than a slice contribute their own midpoint.
pub fn build_slice_centers(ranges: &[FreqRange], slice_hz: u32) -> Vec<u64> {
    let slice = u64::from(slice_hz);
    let mut centers = Vec::new();
    for range in ranges {
        let span = range.end_hz.saturating_sub(range.start_hz);
        if span == 0 {
            continue;
        }
        if span <= slice {
            centers.push(range.start_hz + span / 2);
            continue;
        }
        let mut start = range.start_hz;
        while start < range.end_hz {
            centers.push(start + slice / 2);
            start += slice;
        }
    }
    centers
}

/// Walks slice centers round-robin, interleaving one priority-channel
/// visit after every `priority_interval` grid steps. Priority channels
/// rotate in `(priority asc, frequency asc)` order.
pub struct SweepCursor {
    centers: Vec<u64>,
    idx: usize,
    priority_interval: usize,
    normal_since_priority: usize,
    priority_idx: usize,
}

impl SweepCursor {
    pub fn new(centers: Vec<u64>, priority_interval: usize) -> Self {
        Self {
            centers,
            idx: 0,
            priority_interval,
            normal_since_priority: 0,
            priority_idx: 0,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.centers.len()
    }

    pub fn position(&self) -> usize {
        self.idx
    }

    /// `channels` must already be filtered to enabled rows and sorted by
    /// `(priority, frequency)`; the store query guarantees that.
    pub fn next(&mut self, channels: &[ScannerChannel]) -> Option<SweepStep> {
        let priority_due = !channels.is_empty()
            && (self.centers.is_empty() || self.normal_since_priority >= self.priority_interval);
        if priority_due {
            self.normal_since_priority = 0;
            let channel = channels[self.priority_idx % channels.len()].clone();
            self.priority_idx += 1;
            return Some(SweepStep::Priority { channel });
        }
        if self.centers.is_empty() {
            return None;
        }
        let center = self.centers[self.idx];
        self.idx = (self.idx + 1) % self.centers.len();
        self.normal_since_priority += 1;
        Some(SweepStep::Slice { center_hz: center })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skywave_core::protocol::ChannelMode;

    fn channel(id: u32, freq: u64, priority: u8) -> ScannerChannel {
        ScannerChannel {
            id,
            frequency_hz: freq,
            label: format!("ch{id}"),
            category: "test".to_string(),
            mode: ChannelMode::Nfm,
            priority,
            enabled: true,
        }
    }

    #[test]
    fn short_range_contributes_its_midpoint() {
        let centers = build_slice_centers(
            &[FreqRange {
                start_hz: 446_000_000,
                end_hz: 446_100_000,
            }],
            2_048_000,
        );
        assert_eq!(centers, vec![446_050_000]);
    }

    #[test]
    fn long_range_steps_one_slice_at_a_time() {
        let centers = build_slice_centers(
            &[FreqRange {
                start_hz: 430_000_000,
                end_hz: 436_000_000,
            }],
            2_000_000,
        );
        assert_eq!(centers, vec![431_000_000, 433_000_000, 435_000_000]);
    }

    #[test]
    fn priority_channels_interleave_every_third_step() {
        let mut cursor = SweepCursor::new(vec![1, 2, 3, 4, 5, 6], 3);
        let channels = vec![channel(10, 100, 1), channel(11, 200, 2)];
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(cursor.next(&channels).unwrap());
        }
        assert_eq!(seen[0].center_hz(), 1);
        assert_eq!(seen[1].center_hz(), 2);
        assert_eq!(seen[2].center_hz(), 3);
        // Fourth step is the first priority channel, round-robin after.
        assert!(matches!(&seen[3], SweepStep::Priority { channel } if channel.id == 10));
        assert_eq!(seen[4].center_hz(), 4);
        assert_eq!(seen[5].center_hz(), 5);
        assert_eq!(seen[6].center_hz(), 6);
        assert!(matches!(&seen[7], SweepStep::Priority { channel } if channel.id == 11));
    }

    #[test]
    fn no_channels_means_grid_only() {
        let mut cursor = SweepCursor::new(vec![7, 8], 3);
        for _ in 0..10 {
            assert!(matches!(cursor.next(&[]), Some(SweepStep::Slice { .. })));
        }
    }

    #[test]
    fn empty_grid_with_channels_still_visits_priorities() {
        let mut cursor = SweepCursor::new(Vec::new(), 0);
        let channels = vec![channel(1, 100, 1)];
        // priority_interval 0 degenerates to priorities only.
        assert!(matches!(
            cursor.next(&channels),
            Some(SweepStep::Priority { .. })
        ));
    }
}
