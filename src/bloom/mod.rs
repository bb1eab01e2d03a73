//! # Bloom Manager - Fractal Lineage Store
//!
//! Arena of cognitive-state nodes consumed by the entropy analyzer. Blooms
//! form a tree: links are ids, never pointers, and rebloom rejects any
//! ancestry that would loop. Resonance decays with idle time until a bloom
//! falls dormant; dormant blooms are pruned at the population cap.

use crate::clock::SharedClock;
use crate::error::{DawnError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Dimensionality of bloom semantic vectors.
pub const SEMANTIC_VECTOR_LEN: usize = 64;

/// Resonance floor below which a bloom is dormant.
const DORMANCY_FLOOR: f64 = 0.05;

/// Idle seconds before resonance starts decaying.
const IDLE_GRACE_SECS: f64 = 60.0;

/// Resonance lost per minute of idle time.
const RESONANCE_DECAY_PER_MIN: f64 = 0.01;

/// Resonance restored by an access.
const TOUCH_RESONANCE: f64 = 0.25;

/// A node in the lineage tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bloom {
    /// Arena key
    pub id: String,
    /// Seed text the bloom grew from
    pub seed: String,
    /// Mood vector
    pub mood: HashMap<String, f64>,
    /// Current entropy in [0, 1]
    pub entropy: f64,
    /// Parent id; `None` for roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Distance from the root (root = 0)
    pub depth: u32,
    /// Child ids
    #[serde(default)]
    pub children: Vec<String>,
    /// Fixed-length semantic embedding of the seed
    pub semantic_vector: Vec<f32>,
    /// Free-form tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Liveliness in [0, 1]; decays while idle
    pub resonance: f64,
    /// Heat at creation
    pub heat: f64,
    /// Coherence in [0, 1]
    pub coherence: f64,
    /// Structural complexity in [0, 1]
    pub complexity: f64,
    /// Semantic distance from the parent seed
    pub semantic_drift: f64,
    /// Accumulated |entropy delta| along the lineage
    pub total_entropy_drift: f64,
    /// Whether the bloom still participates in analysis
    pub is_active: bool,
    /// `1 - resonance`
    pub dormancy_level: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last access time
    pub last_accessed: DateTime<Utc>,
}

/// Arena of blooms keyed by id.
pub struct BloomManager {
    arena: HashMap<String, Bloom>,
    counter: u64,
    capacity: usize,
    last_decay_at: Option<DateTime<Utc>>,
    clock: SharedClock,
}

impl BloomManager {
    /// Create a manager bounded at `capacity` blooms.
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        Self {
            arena: HashMap::new(),
            counter: 0,
            capacity,
            last_decay_at: None,
            clock,
        }
    }

    /// Create a root bloom.
    pub fn spawn(
        &mut self,
        seed: &str,
        entropy: f64,
        mood: HashMap<String, f64>,
        tags: BTreeSet<String>,
    ) -> Result<String> {
        if !entropy.is_finite() || !(0.0..=1.0).contains(&entropy) {
            return Err(DawnError::Validation(format!(
                "bloom entropy must be in [0, 1], got {entropy}"
            )));
        }

        self.prune_dormant();

        self.counter += 1;
        let id = format!("bloom-{:04}", self.counter);
        let now = self.clock.now();

        let bloom = Bloom {
            id: id.clone(),
            seed: seed.to_string(),
            mood,
            entropy,
            parent_id: None,
            depth: 0,
            children: Vec::new(),
            semantic_vector: seed_vector(seed),
            tags,
            resonance: 1.0,
            heat: 0.0,
            coherence: (1.0 - entropy * 0.5).clamp(0.0, 1.0),
            complexity: 0.1,
            semantic_drift: 0.0,
            total_entropy_drift: 0.0,
            is_active: true,
            dormancy_level: 0.0,
            created_at: now,
            last_accessed: now,
        };

        debug!(bloom = %id, seed, "bloom spawned");
        self.arena.insert(id.clone(), bloom);
        Ok(id)
    }

    /// Create a child bloom from `parent_id` with a mutated seed and an
    /// entropy delta. Rejects unknown parents and looping ancestries.
    pub fn rebloom(
        &mut self,
        parent_id: &str,
        seed_mutation: &str,
        entropy_delta: f64,
    ) -> Result<String> {
        if !entropy_delta.is_finite() {
            return Err(DawnError::Validation(
                "entropy delta is not finite".to_string(),
            ));
        }

        self.assert_acyclic(parent_id)?;
        self.prune_dormant();

        let parent = self
            .arena
            .get(parent_id)
            .cloned()
            .ok_or_else(|| DawnError::Bloom(format!("unknown parent bloom: {parent_id}")))?;

        let seed = format!("{}/{}", parent.seed, seed_mutation);
        let entropy = (parent.entropy + entropy_delta).clamp(0.0, 1.0);
        let vector = seed_vector(&seed);
        let drift = vector_distance(&parent.semantic_vector, &vector);
        let depth = parent.depth + 1;
        let now = self.clock.now();

        self.counter += 1;
        let id = format!("bloom-{:04}", self.counter);

        let bloom = Bloom {
            id: id.clone(),
            seed,
            mood: parent.mood.clone(),
            entropy,
            parent_id: Some(parent_id.to_string()),
            depth,
            children: Vec::new(),
            semantic_vector: vector,
            tags: parent.tags.clone(),
            resonance: 1.0,
            heat: parent.heat,
            coherence: (1.0 - entropy * 0.5).clamp(0.0, 1.0),
            complexity: (0.1 + 0.1 * depth as f64).clamp(0.0, 1.0),
            semantic_drift: drift,
            total_entropy_drift: parent.total_entropy_drift + entropy_delta.abs(),
            is_active: true,
            dormancy_level: 0.0,
            created_at: now,
            last_accessed: now,
        };

        self.arena.insert(id.clone(), bloom);
        if let Some(parent) = self.arena.get_mut(parent_id) {
            parent.children.push(id.clone());
        }

        debug!(bloom = %id, parent = parent_id, depth, "rebloom");
        Ok(id)
    }

    /// Refresh a bloom's access time and restore resonance.
    pub fn touch(&mut self, id: &str) -> Result<()> {
        let now = self.clock.now();
        let bloom = self
            .arena
            .get_mut(id)
            .ok_or_else(|| DawnError::Bloom(format!("unknown bloom: {id}")))?;

        bloom.last_accessed = now;
        bloom.resonance = (bloom.resonance + TOUCH_RESONANCE).min(1.0);
        bloom.dormancy_level = 1.0 - bloom.resonance;
        bloom.is_active = true;
        Ok(())
    }

    /// Decay resonance of idle blooms. Called once per tick by the
    /// scheduler; decay is proportional to elapsed time, so tick cadence
    /// does not change the decay rate.
    pub fn decay_resonance(&mut self) {
        let now = self.clock.now();
        let elapsed_mins = match self.last_decay_at {
            Some(last) => ((now - last).num_milliseconds() as f64 / 60_000.0).max(0.0),
            None => 0.0,
        };
        self.last_decay_at = Some(now);

        if elapsed_mins == 0.0 {
            return;
        }

        for bloom in self.arena.values_mut() {
            let idle_secs = (now - bloom.last_accessed).num_milliseconds() as f64 / 1000.0;
            if idle_secs <= IDLE_GRACE_SECS {
                continue;
            }

            bloom.resonance =
                (bloom.resonance - RESONANCE_DECAY_PER_MIN * elapsed_mins).max(0.0);
            bloom.dormancy_level = 1.0 - bloom.resonance;
            if bloom.resonance <= DORMANCY_FLOOR {
                bloom.is_active = false;
            }
        }
    }

    /// Record an entropy movement on a bloom (analysis feedback path).
    pub fn record_entropy(&mut self, id: &str, entropy: f64) -> Result<()> {
        let bloom = self
            .arena
            .get_mut(id)
            .ok_or_else(|| DawnError::Bloom(format!("unknown bloom: {id}")))?;
        if !entropy.is_finite() || !(0.0..=1.0).contains(&entropy) {
            return Err(DawnError::Validation(format!(
                "bloom entropy must be in [0, 1], got {entropy}"
            )));
        }

        bloom.total_entropy_drift += (entropy - bloom.entropy).abs();
        bloom.entropy = entropy;
        bloom.coherence = (1.0 - entropy * 0.5).clamp(0.0, 1.0);
        Ok(())
    }

    /// Bloom by id.
    pub fn get(&self, id: &str) -> Option<&Bloom> {
        self.arena.get(id)
    }

    /// Number of blooms in the arena.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Active blooms, sorted by id (snapshot export).
    pub fn active_blooms(&self) -> Vec<&Bloom> {
        let mut active: Vec<&Bloom> = self.arena.values().filter(|b| b.is_active).collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Persist every bloom as `blooms/<id>.json` under `state_root`.
    pub fn persist_all(&self, state_root: &Path) -> Result<()> {
        let dir = state_root.join("blooms");
        fs::create_dir_all(&dir)?;

        for bloom in self.arena.values() {
            let path = dir.join(format!("{}.json", bloom.id));
            let tmp = dir.join(format!("{}.json.tmp", bloom.id));
            fs::write(&tmp, serde_json::to_vec_pretty(bloom)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    /// Restore blooms from an imported snapshot.
    pub fn restore(&mut self, blooms: Vec<Bloom>) {
        self.counter = self.counter.max(blooms.len() as u64);
        for bloom in blooms {
            self.arena.insert(bloom.id.clone(), bloom);
        }
    }

    /// Walk ancestry from `start`; a revisited id means the arena is
    /// corrupt and the rebloom is rejected.
    fn assert_acyclic(&self, start: &str) -> Result<()> {
        let mut visited = HashSet::new();
        let mut cursor = Some(start.to_string());

        while let Some(id) = cursor {
            if !visited.insert(id.clone()) {
                return Err(DawnError::Invariant(format!(
                    "bloom lineage cycle detected at {id}"
                )));
            }
            cursor = self.arena.get(&id).and_then(|b| b.parent_id.clone());
        }
        Ok(())
    }

    /// Drop the most dormant blooms while over capacity. Dormant blooms go
    /// first; active blooms are only pruned when nothing dormant remains.
    fn prune_dormant(&mut self) {
        while self.arena.len() >= self.capacity {
            let victim = self
                .arena
                .values()
                .min_by(|a, b| {
                    (a.is_active, a.resonance)
                        .partial_cmp(&(b.is_active, b.resonance))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|b| b.id.clone());

            match victim {
                Some(id) => {
                    warn!(bloom = %id, "bloom arena at capacity, pruning");
                    self.remove(&id);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, id: &str) {
        if let Some(bloom) = self.arena.remove(id) {
            if let Some(parent_id) = bloom.parent_id {
                if let Some(parent) = self.arena.get_mut(&parent_id) {
                    parent.children.retain(|c| c != id);
                }
            }
        }
    }
}

/// Deterministic fixed-length embedding of a seed string.
pub fn seed_vector(seed: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; SEMANTIC_VECTOR_LEN];
    for (i, byte) in seed.bytes().enumerate() {
        let slot = (i.wrapping_mul(31).wrapping_add(byte as usize)) % SEMANTIC_VECTOR_LEN;
        v[slot] += 1.0;
    }

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Euclidean distance between two embeddings.
pub fn vector_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((x - y) as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}
