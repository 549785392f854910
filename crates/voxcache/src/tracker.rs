//! Phrase frequency tracking
//!
//! Counts cache misses per phrase and decides when a phrase has earned a
//! place in the store. Capacity is bounded: when full, the phrase seen least
//! recently is forgotten along with its progress toward promotion.
//!
//! Recency is an intrusive doubly-linked list over a slab, so bumping and
//! forgetting are both O(1).

use std::collections::{HashMap, HashSet};

use ahash::RandomState;

use crate::config::CacheConfig;

/// Tracked phrase in the recency list
struct Node {
    phrase: String,
    count: u32,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Result of recording one occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    /// Occurrences seen so far (0 for phrases that are never tracked)
    pub count: u32,
    /// Whether the phrase is now eligible for storage
    pub promoted: bool,
}

/// Bounded occurrence counter with least-recently-seen forgetting
pub struct FrequencyTracker {
    map: HashMap<String, usize, RandomState>,
    nodes: Vec<Option<Node>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    capacity: usize,
    threshold: u32,
    max_phrase_len: usize,
    /// Lowercased pre-seeded phrases
    seeds: HashSet<String, RandomState>,
}

impl FrequencyTracker {
    /// Create a tracker
    ///
    /// # Arguments
    /// * `threshold` - Occurrences needed for promotion (at least 1)
    /// * `capacity` - Distinct phrases remembered (at least 1)
    /// * `max_phrase_len` - Longest eligible phrase in characters
    pub fn new(threshold: u32, capacity: usize, max_phrase_len: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            map: HashMap::with_capacity_and_hasher(capacity.min(1024), RandomState::new()),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
            capacity,
            threshold: threshold.max(1),
            max_phrase_len,
            seeds: HashSet::with_hasher(RandomState::new()),
        }
    }

    /// Create a tracker from the cache configuration, including its seeds
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut tracker = Self::new(
            config.promotion_threshold,
            config.max_tracked_phrases,
            config.max_phrase_len,
        );
        tracker.seed(&config.pre_seeded_phrases);
        tracker
    }

    /// Mark phrases as promoted from their first occurrence.
    ///
    /// Matching ignores surrounding whitespace and letter case.
    pub fn seed<I, S>(&mut self, phrases: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for phrase in phrases {
            let phrase = phrase.as_ref().trim();
            if !phrase.is_empty() {
                self.seeds.insert(phrase.to_lowercase());
            }
        }
    }

    /// Whether `phrase` is on the pre-seed list
    pub fn is_seeded(&self, phrase: &str) -> bool {
        self.seeds.contains(&phrase.trim().to_lowercase())
    }

    /// Record one occurrence of `raw` and report its promotion status
    pub fn record_occurrence(&mut self, raw: &str) -> Occurrence {
        let phrase = raw.trim();
        if !self.eligible(phrase) {
            return Occurrence {
                count: 0,
                promoted: false,
            };
        }

        let count = match self.map.get(phrase) {
            Some(&idx) => {
                self.move_to_front(idx);
                match &mut self.nodes[idx] {
                    Some(node) => {
                        node.count = node.count.saturating_add(1);
                        node.count
                    }
                    None => 0,
                }
            }
            None => {
                self.insert(phrase);
                1
            }
        };

        Occurrence {
            count,
            promoted: count >= self.threshold || self.is_seeded(phrase),
        }
    }

    /// Promotion status of `raw` without recording an occurrence
    pub fn is_promoted(&self, raw: &str) -> bool {
        let phrase = raw.trim();
        self.eligible(phrase) && (self.is_seeded(phrase) || self.count(phrase) >= self.threshold)
    }

    /// Occurrences currently remembered for `raw`
    pub fn count(&self, raw: &str) -> u32 {
        self.map
            .get(raw.trim())
            .and_then(|&idx| self.nodes[idx].as_ref())
            .map_or(0, |node| node.count)
    }

    /// Number of tracked phrases
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if no phrase is tracked
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of tracked phrases
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occurrences needed for promotion
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Forget all counts. Seeds stay.
    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
    }

    fn eligible(&self, phrase: &str) -> bool {
        !phrase.is_empty() && phrase.chars().count() <= self.max_phrase_len
    }

    fn insert(&mut self, phrase: &str) {
        if self.map.len() >= self.capacity {
            self.forget_oldest();
        }

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            phrase: phrase.to_string(),
            count: 1,
            prev: None,
            next: self.head,
        });
        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.map.insert(phrase.to_string(), idx);
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }

        self.unlink(idx);
        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }
        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn forget_oldest(&mut self) {
        let Some(tail_idx) = self.tail else {
            return;
        };
        self.unlink(tail_idx);
        if let Some(node) = self.nodes[tail_idx].take() {
            self.map.remove(&node.phrase);
        }
        self.free_list.push(tail_idx);
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            self.nodes.push(None);
            self.nodes.len() - 1
        }
    }
}
