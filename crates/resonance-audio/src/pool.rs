use std::collections::VecDeque;

use crate::backend::PlaybackChannel;
use crate::record::PlaybackRecord;

/// Stable index of a record in the pool's arena.
pub type SlotIndex = usize;

/// Slot arena of playback records with a FIFO free list.
///
/// Records are never moved once created, so a `SlotIndex` stays valid for the
/// record's whole life. Slots emptied by [`RecordPool::drain_idle`] are
/// reused for later records.
pub struct RecordPool<C> {
    slots: Vec<Option<PlaybackRecord<C>>>,
    idle: VecDeque<SlotIndex>,
    vacant: Vec<SlotIndex>,
}

impl<C: PlaybackChannel> RecordPool<C> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            idle: VecDeque::new(),
            vacant: Vec::new(),
        }
    }

    /// Take an idle record, or build one around a fresh channel on a miss.
    /// The returned record's channel is active.
    pub fn acquire(&mut self, create_channel: impl FnOnce() -> C) -> SlotIndex {
        while let Some(slot) = self.idle.pop_front() {
            if let Some(record) = self.slots[slot].as_mut() {
                record.channel_mut().set_active(true);
                return slot;
            }
        }

        let mut channel = create_channel();
        channel.set_active(true);
        let record = PlaybackRecord::new(channel);
        match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(record);
                slot
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        }
    }

    /// Return a record to the free list. It must already be cleared.
    pub fn release(&mut self, slot: SlotIndex) {
        if self.slots.get(slot).is_some_and(|s| s.is_some()) && !self.idle.contains(&slot) {
            self.idle.push_back(slot);
        }
    }

    pub fn get(&self, slot: SlotIndex) -> Option<&PlaybackRecord<C>> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, slot: SlotIndex) -> Option<&mut PlaybackRecord<C>> {
        self.slots.get_mut(slot).and_then(|s| s.as_mut())
    }

    /// Remove every idle record and hand back their channels for destruction.
    pub fn drain_idle(&mut self) -> Vec<C> {
        let mut channels = Vec::with_capacity(self.idle.len());
        while let Some(slot) = self.idle.pop_front() {
            if let Some(record) = self.slots[slot].take() {
                channels.push(record.into_channel());
                self.vacant.push(slot);
            }
        }
        channels
    }

    /// Number of idle records waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Number of live records, idle or in use.
    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }
}

impl<C: PlaybackChannel> Default for RecordPool<C> {
    fn default() -> Self {
        Self::new()
    }
}
