use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// EVENT
// -----------------------------------------------------------------------------

/// A single brightness-change report. `polarity == true` is an ON event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: i64,
    pub x: u16,
    pub y: u16,
    pub polarity: bool,
}

impl Event {
    pub fn new(timestamp: i64, x: u16, y: u16, polarity: bool) -> Self {
        Self {
            timestamp,
            x,
            y,
            polarity,
        }
    }
}

// RESOLUTION ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u16,
    pub height: u16,
}

impl Resolution {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        x < self.width && y < self.height
    }

    /// Row-major index of `(x, y)`. Caller checks `contains` first.
    #[inline]
    pub fn index(&self, x: u16, y: u16) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

// -----------------------------------------------------------------------------
// EVENT BATCH
// -----------------------------------------------------------------------------

/// Events from one poll of one sensor, stored column-wise so the rasterizer
/// and filters can walk plain coordinate/polarity arrays.
///
/// Drivers deliver timestamps non-decreasing. A batch is moved from stage to
/// stage; the filters compact it in place and hand the same allocation on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    timestamps: Vec<i64>,
    xs: Vec<u16>,
    ys: Vec<u16>,
    polarities: Vec<bool>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            xs: Vec::with_capacity(capacity),
            ys: Vec::with_capacity(capacity),
            polarities: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Appends without checking order; see `is_time_ordered`.
    pub fn push(&mut self, event: Event) {
        self.timestamps.push(event.timestamp);
        self.xs.push(event.x);
        self.ys.push(event.y);
        self.polarities.push(event.polarity);
    }

    pub fn is_time_ordered(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] <= w[1])
    }

    pub fn get(&self, index: usize) -> Option<Event> {
        if index >= self.len() {
            return None;
        }
        Some(Event {
            timestamp: self.timestamps[index],
            x: self.xs[index],
            y: self.ys[index],
            polarity: self.polarities[index],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.timestamps
            .iter()
            .zip(&self.xs)
            .zip(&self.ys)
            .zip(&self.polarities)
            .map(|(((&timestamp, &x), &y), &polarity)| Event {
                timestamp,
                x,
                y,
                polarity,
            })
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn xs(&self) -> &[u16] {
        &self.xs
    }

    pub fn ys(&self) -> &[u16] {
        &self.ys
    }

    pub fn polarities(&self) -> &[bool] {
        &self.polarities
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }

    /// Keeps the events for which `keep` returns true, preserving order.
    /// Compacts in place, no reallocation.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(Event) -> bool,
    {
        let mut write = 0;
        for read in 0..self.len() {
            let event = Event {
                timestamp: self.timestamps[read],
                x: self.xs[read],
                y: self.ys[read],
                polarity: self.polarities[read],
            };
            if keep(event) {
                self.timestamps[write] = event.timestamp;
                self.xs[write] = event.x;
                self.ys[write] = event.y;
                self.polarities[write] = event.polarity;
                write += 1;
            }
        }
        self.timestamps.truncate(write);
        self.xs.truncate(write);
        self.ys.truncate(write);
        self.polarities.truncate(write);
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.xs.clear();
        self.ys.clear();
        self.polarities.clear();
    }
}

impl FromIterator<Event> for EventBatch {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut batch = EventBatch::with_capacity(iter.size_hint().0);
        for event in iter {
            batch.push(event);
        }
        batch
    }
}

impl Extend<Event> for EventBatch {
    fn extend<I: IntoIterator<Item = Event>>(&mut self, iter: I) {
        for event in iter {
            self.push(event);
        }
    }
}

// FRAME IMAGE -----------------------------------------------------------------

/// Greyscale intensity frame from the sensor's frame sub-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub resolution: Resolution,
    pub timestamp: i64,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> EventBatch {
        vec![
            Event::new(0, 1, 1, true),
            Event::new(5, 2, 2, false),
            Event::new(9, 3, 0, true),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_iter_yields_events_in_order() {
        let batch = sample_batch();
        let events: Vec<Event> = batch.iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], Event::new(5, 2, 2, false));
        assert_eq!(batch.first_timestamp(), Some(0));
        assert_eq!(batch.last_timestamp(), Some(9));
    }

    #[test]
    fn test_retain_compacts_in_place() {
        let mut batch = sample_batch();
        batch.retain(|e| e.polarity);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.xs(), &[1, 3]);
        assert_eq!(batch.timestamps(), &[0, 9]);
    }

    #[test]
    fn test_out_of_order_push_is_accepted_and_detected() {
        let mut batch = sample_batch();
        assert!(batch.is_time_ordered());
        batch.push(Event::new(0, 1, 1, true));
        assert_eq!(batch.len(), 4);
        assert!(!batch.is_time_ordered());
    }

    #[test]
    fn test_get_out_of_range() {
        assert!(sample_batch().get(3).is_none());
        assert!(EventBatch::new().get(0).is_none());
    }

    #[test]
    fn test_resolution_index_is_row_major() {
        let res = Resolution::new(4, 3);
        assert_eq!(res.pixel_count(), 12);
        assert_eq!(res.index(1, 2), 9);
        assert!(res.contains(3, 2));
        assert!(!res.contains(4, 0));
        assert!(!res.contains(0, 3));
    }
}
