// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A queue that applies a predicate before enqueue; discovery feeds the run
/// through one of these so name/tag filters act at the handoff, not inside
/// the scheduler.
pub struct FilteredQueue<T> {
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
    entries: VecDeque<T>,
}

impl<T> FilteredQueue<T> {
    pub fn new(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            entries: VecDeque::new(),
        }
    }

    /// Returns whether the entry was accepted.
    pub fn push(&mut self, entry: T) -> bool {
        if (self.predicate)(&entry) {
            self.entries.push_back(entry);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<T> {
        self.entries.into()
    }
}

/// The shared item queue of one run.
///
/// The initial assignment is strided: slot `k` of `n` holds items
/// `k, k+n, k+2n, ...`, so items that share a setup (usually neighbors in
/// one file) tend to land on the same worker. Once a slot runs dry the queue
/// degrades to shared take-next: the slot steals from the longest remaining
/// backlog, which keeps every worker busy without rebalancing mid-flight.
pub struct ItemQueue<T> {
    slots: Mutex<Vec<VecDeque<T>>>,
}

impl<T> ItemQueue<T> {
    pub fn new(entries: Vec<T>, nslots: usize) -> Self {
        let nslots = nslots.max(1);
        let mut slots: Vec<VecDeque<T>> = (0..nslots).map(|_| VecDeque::new()).collect();
        for (index, entry) in entries.into_iter().enumerate() {
            slots[index % nslots].push_back(entry);
        }
        Self {
            slots: Mutex::new(slots),
        }
    }

    pub fn next(&self, slot: usize) -> Option<T> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = slots.get_mut(slot).and_then(|own| own.pop_front()) {
            return Some(entry);
        }
        let fullest = (0..slots.len()).max_by_key(|index| slots[*index].len())?;
        slots[fullest].pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|slot| slot.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_filters_at_enqueue() {
        let mut queue = FilteredQueue::new(|n: &u32| n % 2 == 0);
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert!(queue.push(4));
        assert_eq!(queue.into_entries(), vec![2, 4]);
    }

    #[test]
    fn initial_assignment_is_strided() {
        let queue = ItemQueue::new((0..6).collect(), 2);
        assert_eq!(queue.next(0), Some(0));
        assert_eq!(queue.next(0), Some(2));
        assert_eq!(queue.next(1), Some(1));
        assert_eq!(queue.next(0), Some(4));
    }

    #[test]
    fn empty_slot_steals_from_the_longest_backlog() {
        let queue = ItemQueue::new((0..6).collect(), 3);
        // Slot 2 drains its own stride, then takes over someone else's.
        assert_eq!(queue.next(2), Some(2));
        assert_eq!(queue.next(2), Some(5));
        let stolen = queue.next(2).unwrap();
        assert!([0, 1].contains(&stolen));
        assert_eq!(queue.remaining(), 3);
    }

    #[test]
    fn no_item_is_lost_or_duplicated() {
        let queue = ItemQueue::new((0..10).collect::<Vec<u32>>(), 3);
        let mut seen = Vec::new();
        for round in 0usize.. {
            match queue.next(round % 3) {
                Some(entry) => seen.push(entry),
                None => break,
            }
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<u32>>());
    }
}
