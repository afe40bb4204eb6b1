//! Time-of-flight events produced by the event windower.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One pixel hit assigned to a trigger interval.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Global, monotonically increasing trigger id.
    pub trigger_id: u64,
    /// X coordinate (pixel).
    pub x: u16,
    /// Y coordinate (pixel).
    pub y: u16,
    /// Time of flight relative to the trigger, in seconds.
    pub tof: f64,
    /// Time over threshold in seconds.
    pub tot: f64,
}

impl Event {
    /// Creates a new event.
    #[inline]
    #[must_use]
    pub fn new(trigger_id: u64, x: u16, y: u16, tof: f64, tot: f64) -> Self {
        Self {
            trigger_id,
            x,
            y,
            tof,
            tot,
        }
    }
}

/// Wall-clock stamps of the trigger intervals that produced events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TriggerTimestamps {
    /// Trigger ids, ascending and distinct.
    pub trigger_id: Vec<u64>,
    /// Wall-clock time of each trigger in nanoseconds.
    pub wall_clock_ns: Vec<u64>,
}

impl TriggerTimestamps {
    /// Number of stamped triggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trigger_id.len()
    }

    /// Returns true if no trigger is stamped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trigger_id.is_empty()
    }

    /// Adds one stamp.
    pub fn push(&mut self, trigger_id: u64, wall_clock_ns: u64) {
        self.trigger_id.push(trigger_id);
        self.wall_clock_ns.push(wall_clock_ns);
    }

    /// Appends all stamps of `other`.
    pub fn append(&mut self, other: &TriggerTimestamps) {
        self.trigger_id.extend_from_slice(&other.trigger_id);
        self.wall_clock_ns.extend_from_slice(&other.wall_clock_ns);
    }
}

/// A batch of events in `SoA` format, with the trigger stamps it refers to.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventBatch {
    /// Trigger id of each event.
    pub trigger_id: Vec<u64>,
    /// X coordinates.
    pub x: Vec<u16>,
    /// Y coordinates.
    pub y: Vec<u16>,
    /// Time of flight in seconds.
    pub tof: Vec<f64>,
    /// Time over threshold in seconds.
    pub tot: Vec<f64>,
    /// Stamps of the triggers used by this batch.
    pub timestamps: TriggerTimestamps,
}

impl EventBatch {
    /// Creates an empty batch with capacity for `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            trigger_id: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            tof: Vec::with_capacity(capacity),
            tot: Vec::with_capacity(capacity),
            timestamps: TriggerTimestamps::default(),
        }
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trigger_id.len()
    }

    /// Returns true if the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trigger_id.is_empty()
    }

    /// Pushes one event.
    pub fn push(&mut self, event: Event) {
        self.trigger_id.push(event.trigger_id);
        self.x.push(event.x);
        self.y.push(event.y);
        self.tof.push(event.tof);
        self.tot.push(event.tot);
    }

    /// Returns the event at `idx`, if any.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Event> {
        Some(Event {
            trigger_id: *self.trigger_id.get(idx)?,
            x: *self.x.get(idx)?,
            y: *self.y.get(idx)?,
            tof: *self.tof.get(idx)?,
            tot: *self.tot.get(idx)?,
        })
    }

    /// Iterates over the events in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.len()).filter_map(|idx| self.get(idx))
    }

    /// Appends events and stamps from another batch.
    pub fn append(&mut self, other: &EventBatch) {
        self.trigger_id.extend_from_slice(&other.trigger_id);
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.tof.extend_from_slice(&other.tof);
        self.tot.extend_from_slice(&other.tot);
        self.timestamps.append(&other.timestamps);
    }
}

impl FromIterator<Event> for EventBatch {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut batch = EventBatch::default();
        for event in iter {
            batch.push(event);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_batch_push_and_iter() {
        let mut batch = EventBatch::with_capacity(2);
        batch.push(Event::new(3, 10, 20, 1e-6, 50e-9));
        batch.push(Event::new(4, 11, 21, 2e-6, 75e-9));

        assert_eq!(batch.len(), 2);
        let events: Vec<Event> = batch.iter().collect();
        assert_eq!(events[1], Event::new(4, 11, 21, 2e-6, 75e-9));
    }

    #[test]
    fn test_append_merges_timestamps() {
        let mut a: EventBatch = [Event::new(0, 1, 1, 0.0, 0.0)].into_iter().collect();
        a.timestamps.push(0, 100);
        let mut b: EventBatch = [Event::new(1, 2, 2, 0.0, 0.0)].into_iter().collect();
        b.timestamps.push(1, 200);

        a.append(&b);
        assert_eq!(a.trigger_id, vec![0, 1]);
        assert_eq!(a.timestamps.wall_clock_ns, vec![100, 200]);
    }
}
