/// Timestamps of a packet sent to the decoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedPts {
    /// Presentation timestamp, the decoding timestamp if the packet had none
    pub pts: f64,
    /// Decoding timestamp
    pub dts: Option<f64>,
    /// Packet duration
    pub duration: Option<f64>,
}

/// Timestamps of packets in decode order, handed out in presentation order
///
/// The decoder reorders frames internally without reporting which packet a frame came from,
/// so every output frame takes the smallest timestamp still queued.
#[derive(Debug, Clone)]
pub struct PtsQueue {
    slots: Vec<Option<BufferedPts>>,
}

impl PtsQueue {
    /// A queue holding up to `capacity` timestamps
    pub fn new(capacity: usize) -> PtsQueue {
        PtsQueue {
            slots: vec![None; capacity],
        }
    }

    /// Remembers the timestamps of a packet
    ///
    /// A packet without pts and dts takes no slot. Returns `false` if the queue is full.
    pub fn push(&mut self, pts: Option<f64>, dts: Option<f64>, duration: Option<f64>) -> bool {
        let slot = match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => slot,
            None => return false,
        };
        if let Some(pts) = pts.or(dts) {
            *slot = Some(BufferedPts { pts, dts, duration });
        }
        true
    }

    /// Takes the smallest timestamp
    pub fn pop_min(&mut self) -> Option<BufferedPts> {
        let (idx, _) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.map(|entry| (idx, entry.pts)))
            .fold(None, |min: Option<(usize, f64)>, (idx, pts)| match min {
                Some((_, min_pts)) if min_pts <= pts => min,
                _ => Some((idx, pts)),
            })?;
        self.slots[idx].take()
    }

    /// Number of queued timestamps
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether no timestamp is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets all timestamps
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
