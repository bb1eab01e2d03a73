//! # Memory Router - Multi-Pool Chunk Store
//!
//! Stores immutable memory chunks, routes them into bounded pools by
//! importance, and retrieves them by content and pulse context.
//!
//! ## Pools
//!
//! - `working`: cap 50, LRU, importance >= 0.5
//! - `recent`: cap 200, FIFO, every chunk
//! - `significant`: importance >= 0.75, lowest-importance eviction over the
//!   soft cap
//!
//! A chunk evicted from its last pool is dropped from the in-memory store;
//! the session JSONL keeps the append-only history.

use crate::bloom::seed_vector;
use crate::clock::SharedClock;
use crate::error::{DawnError, Result};
use crate::types::{MemoryChunk, PoolSet, PulseState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Importance at which a chunk enters the working pool.
pub const WORKING_THRESHOLD: f64 = 0.5;

/// Importance at which a chunk enters the significant pool.
pub const SIGNIFICANT_THRESHOLD: f64 = 0.75;

/// Optional vector backend for retrieval. Failures degrade retrieval to
/// lexical-only; they never error a tick.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a chunk embedding.
    fn upsert(&mut self, id: Uuid, vector: &[f32]) -> anyhow::Result<()>;
    /// Nearest neighbors of a query embedding.
    fn search(&self, vector: &[f32], k: usize) -> anyhow::Result<Vec<Uuid>>;
}

/// A retrieval hit with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// The matching chunk
    pub chunk: MemoryChunk,
    /// Composite relevance in [0, 1]
    pub relevance: f64,
}

/// Read-only statistics over the live store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    /// Live chunks
    pub total_chunks: usize,
    /// Chunk counts by speaker
    pub by_speaker: BTreeMap<String, usize>,
    /// Chunk counts by topic
    pub by_topic: BTreeMap<String, usize>,
    /// Sigil name frequencies
    pub sigil_frequency: BTreeMap<String, usize>,
    /// Ten-bucket histogram of chunk entropy over [0, 1]
    pub entropy_histogram: [usize; 10],
    /// Chunk counts by mood
    pub mood_distribution: BTreeMap<String, usize>,
}

/// Multi-pool memory store.
pub struct MemoryRouter {
    chunks: HashMap<Uuid, MemoryChunk>,
    order: Vec<Uuid>,
    importance: HashMap<Uuid, f64>,
    working: VecDeque<Uuid>,
    recent: VecDeque<Uuid>,
    significant: Vec<Uuid>,
    working_capacity: usize,
    recent_capacity: usize,
    significant_soft_cap: usize,
    suppress_until_tick: u64,
    session_path: PathBuf,
    checkpoint_interval: Duration,
    last_checkpoint: DateTime<Utc>,
    vector_index: Option<Box<dyn VectorIndex>>,
    validation_rejects: u64,
    persist_failures: u64,
    clock: SharedClock,
}

impl MemoryRouter {
    /// Create a router persisting to `<state_root>/memory/<session_id>.jsonl`.
    pub fn new(
        state_root: &Path,
        session_id: &str,
        working_capacity: usize,
        recent_capacity: usize,
        significant_soft_cap: usize,
        checkpoint_interval: Duration,
        clock: SharedClock,
    ) -> Result<Self> {
        let memory_dir = state_root.join("memory");
        fs::create_dir_all(&memory_dir)?;

        let now = clock.now();
        Ok(Self {
            chunks: HashMap::new(),
            order: Vec::new(),
            importance: HashMap::new(),
            working: VecDeque::new(),
            recent: VecDeque::new(),
            significant: Vec::new(),
            working_capacity,
            recent_capacity,
            significant_soft_cap,
            suppress_until_tick: 0,
            session_path: memory_dir.join(format!("{session_id}.jsonl")),
            checkpoint_interval,
            last_checkpoint: now,
            vector_index: None,
            validation_rejects: 0,
            persist_failures: 0,
            clock,
        })
    }

    /// Install a vector backend.
    pub fn set_vector_index(&mut self, index: Box<dyn VectorIndex>) {
        self.vector_index = Some(index);
    }

    /// Store a chunk: compute importance, route into pools, and append to
    /// the session log.
    pub fn store(&mut self, chunk: MemoryChunk) -> Result<PoolSet> {
        self.route(chunk, true)
    }

    /// Re-route previously persisted chunks (snapshot import). No log
    /// appends.
    pub fn restore(&mut self, chunks: Vec<MemoryChunk>) -> Result<()> {
        for chunk in chunks {
            self.route(chunk, false)?;
        }
        Ok(())
    }

    fn route(&mut self, chunk: MemoryChunk, persist: bool) -> Result<PoolSet> {
        self.validate(&chunk)?;

        let importance = self.compute_importance(&chunk);
        let id = chunk.id;

        if let Some(index) = self.vector_index.as_mut() {
            let embedding = seed_vector(&chunk.content);
            if let Err(e) = index.upsert(id, &embedding) {
                warn!(chunk = %id, error = %e, "vector index upsert failed, continuing lexical-only");
            }
        }

        if persist {
            if let Err(e) = self.append_to_log(&chunk) {
                self.persist_failures += 1;
                warn!(chunk = %id, error = %e, "session log append failed");
            }
        }

        self.chunks.insert(id, chunk);
        self.order.push(id);
        self.importance.insert(id, importance);

        let mut pools = PoolSet {
            recent: true,
            ..PoolSet::default()
        };

        self.recent.push_back(id);
        while self.recent.len() > self.recent_capacity {
            let evicted = self.recent.pop_front();
            if let Some(evicted) = evicted {
                self.collect_if_orphaned(evicted);
            }
        }

        if importance >= WORKING_THRESHOLD {
            pools.working = true;
            self.working.push_back(id);
            while self.working.len() > self.working_capacity {
                let evicted = self.working.pop_front();
                if let Some(evicted) = evicted {
                    self.collect_if_orphaned(evicted);
                }
            }
        }

        if importance >= SIGNIFICANT_THRESHOLD {
            pools.significant = true;
            self.significant.push(id);
            while self.significant.len() > self.significant_soft_cap {
                self.evict_least_significant();
            }
        }

        debug!(chunk = %id, importance, ?pools, "chunk routed");
        Ok(pools)
    }

    /// Relevance-ranked retrieval:
    /// `0.5*text_overlap + 0.2*tag_overlap + 0.2*pulse_similarity +
    ///  0.1*recency_bonus`. With a vector backend, candidates are the union
    /// of lexical matches and nearest neighbors.
    pub fn retrieve(
        &mut self,
        query: &str,
        context: Option<&PulseState>,
        k: usize,
    ) -> Vec<RetrievedChunk> {
        let query_words = words(query);
        let now = self.clock.now();

        let mut candidates: HashSet<Uuid> = self
            .chunks
            .values()
            .filter(|c| {
                jaccard(&query_words, &words(&c.content)) > 0.0
                    || jaccard(&query_words, &tag_words(c)) > 0.0
            })
            .map(|c| c.id)
            .collect();

        if let Some(index) = self.vector_index.as_ref() {
            match index.search(&seed_vector(query), k.max(1) * 2) {
                Ok(neighbors) => {
                    candidates.extend(neighbors.into_iter().filter(|id| self.chunks.contains_key(id)));
                }
                Err(e) => {
                    warn!(error = %e, "vector search failed, degrading to lexical-only");
                }
            }
        }

        let mut scored: Vec<RetrievedChunk> = candidates
            .into_iter()
            .filter_map(|id| self.chunks.get(&id))
            .map(|chunk| {
                let text_overlap = jaccard(&query_words, &words(&chunk.content));
                let tag_overlap = jaccard(&query_words, &tag_words(chunk));
                let pulse = context
                    .map(|ctx| pulse_similarity(ctx, &chunk.pulse_state))
                    .unwrap_or(0.0);
                let age_secs =
                    ((now - chunk.timestamp).num_milliseconds() as f64 / 1000.0).max(0.0);
                let recency = (-age_secs / 3600.0).exp();

                RetrievedChunk {
                    chunk: chunk.clone(),
                    relevance: 0.5 * text_overlap
                        + 0.2 * tag_overlap
                        + 0.2 * pulse
                        + 0.1 * recency,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(k);

        // Retrieval refreshes working-pool recency.
        for hit in &scored {
            self.refresh_working(hit.chunk.id);
        }
        scored
    }

    /// Chunks cognitively similar to a reference:
    /// `0.4*semantic_overlap + 0.3*pulse_similarity + 0.2*shared_sigils +
    ///  0.1*same_speaker`. Returns nothing while suppressed.
    pub fn rebloom_candidates(
        &self,
        reference: &MemoryChunk,
        k: usize,
        current_tick: u64,
    ) -> Vec<RetrievedChunk> {
        if current_tick < self.suppress_until_tick {
            debug!(
                current_tick,
                until = self.suppress_until_tick,
                "rebloom suppressed"
            );
            return Vec::new();
        }

        let ref_words = words(&reference.content);
        let ref_sigils: HashSet<&str> = reference.sigils.iter().map(String::as_str).collect();

        let mut scored: Vec<RetrievedChunk> = self
            .chunks
            .values()
            .filter(|c| c.id != reference.id)
            .map(|chunk| {
                let semantic = jaccard(&ref_words, &words(&chunk.content));
                let pulse = pulse_similarity(&reference.pulse_state, &chunk.pulse_state);
                let sigils: HashSet<&str> = chunk.sigils.iter().map(String::as_str).collect();
                let shared = set_jaccard(&ref_sigils, &sigils);
                let same_speaker = if chunk.speaker == reference.speaker {
                    1.0
                } else {
                    0.0
                };

                RetrievedChunk {
                    chunk: chunk.clone(),
                    relevance: 0.4 * semantic + 0.3 * pulse + 0.2 * shared + 0.1 * same_speaker,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(k);
        scored
    }

    /// Ignore `rebloom_candidates` calls until the given tick.
    pub fn suppress_rebloom_until(&mut self, tick: u64) {
        self.suppress_until_tick = self.suppress_until_tick.max(tick);
    }

    /// Statistics over the live store. Read-only; evicts nothing.
    pub fn compress(&self) -> MemorySummary {
        let mut by_speaker = BTreeMap::new();
        let mut by_topic = BTreeMap::new();
        let mut sigil_frequency = BTreeMap::new();
        let mut entropy_histogram = [0usize; 10];
        let mut mood_distribution = BTreeMap::new();

        for chunk in self.chunks.values() {
            *by_speaker.entry(chunk.speaker.clone()).or_insert(0) += 1;
            if let Some(topic) = &chunk.topic {
                *by_topic.entry(topic.clone()).or_insert(0) += 1;
            }
            for sigil in &chunk.sigils {
                *sigil_frequency.entry(sigil.clone()).or_insert(0) += 1;
            }

            let bucket = ((chunk.pulse_state.entropy * 10.0) as usize).min(9);
            entropy_histogram[bucket] += 1;

            *mood_distribution
                .entry(chunk.pulse_state.mood.clone())
                .or_insert(0) += 1;
        }

        MemorySummary {
            total_chunks: self.chunks.len(),
            by_speaker,
            by_topic,
            sigil_frequency,
            entropy_histogram,
            mood_distribution,
        }
    }

    /// Rewrite the session file if the checkpoint interval elapsed (or
    /// unconditionally when forced). Atomic: temp file + rename.
    pub fn checkpoint(&mut self, force: bool) -> Result<()> {
        let now = self.clock.now();
        let due = (now - self.last_checkpoint).num_seconds()
            >= self.checkpoint_interval.as_secs() as i64;
        if !force && !due {
            return Ok(());
        }

        let tmp = self.session_path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&tmp)?;
        for id in &self.order {
            if let Some(chunk) = self.chunks.get(id) {
                serde_json::to_writer(&mut file, chunk)?;
                file.write_all(b"\n")?;
            }
        }
        file.flush()?;
        fs::rename(&tmp, &self.session_path)?;

        self.last_checkpoint = now;
        debug!(chunks = self.order.len(), path = %self.session_path.display(), "memory checkpoint");
        Ok(())
    }

    /// Up to the last `n` chunks, oldest first.
    pub fn recent_chunks(&self, n: usize) -> Vec<MemoryChunk> {
        let skip = self.order.len().saturating_sub(n);
        self.order[skip..]
            .iter()
            .filter_map(|id| self.chunks.get(id).cloned())
            .collect()
    }

    /// Chunk by id.
    pub fn get(&self, id: &Uuid) -> Option<&MemoryChunk> {
        self.chunks.get(id)
    }

    /// Importance recorded for a chunk.
    pub fn importance_of(&self, id: &Uuid) -> Option<f64> {
        self.importance.get(id).copied()
    }

    /// Working pool ids, coldest first.
    pub fn working_ids(&self) -> Vec<Uuid> {
        self.working.iter().copied().collect()
    }

    /// Recent pool ids, oldest first.
    pub fn recent_ids(&self) -> Vec<Uuid> {
        self.recent.iter().copied().collect()
    }

    /// Significant pool ids.
    pub fn significant_ids(&self) -> Vec<Uuid> {
        self.significant.clone()
    }

    /// Chunks rejected by validation.
    pub fn validation_rejects(&self) -> u64 {
        self.validation_rejects
    }

    /// Failed log appends since start.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures
    }

    /// Path of the session JSONL file.
    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    /// `importance = 0.30*entropy + 0.30*|heat-33|/67 + 0.25*[has sigils] +
    ///  0.15*speaker_weight`
    fn compute_importance(&self, chunk: &MemoryChunk) -> f64 {
        let heat_deviation = ((chunk.pulse_state.heat - 33.0).abs() / 67.0).min(1.0);
        let has_sigils = if chunk.sigils.is_empty() { 0.0 } else { 1.0 };
        let speaker_weight = match chunk.speaker.as_str() {
            "system" => 1.0,
            "user" => 0.8,
            _ => 0.5,
        };

        (0.30 * chunk.pulse_state.entropy
            + 0.30 * heat_deviation
            + 0.25 * has_sigils
            + 0.15 * speaker_weight)
            .clamp(0.0, 1.0)
    }

    fn validate(&mut self, chunk: &MemoryChunk) -> Result<()> {
        let reject = |s: String| DawnError::Validation(s);

        if chunk.speaker.is_empty() {
            self.validation_rejects += 1;
            return Err(reject("chunk speaker is empty".to_string()));
        }
        if chunk.content.is_empty() {
            self.validation_rejects += 1;
            return Err(reject("chunk content is empty".to_string()));
        }
        if !chunk.pulse_state.heat.is_finite()
            || !(0.0..=100.0).contains(&chunk.pulse_state.heat)
        {
            self.validation_rejects += 1;
            return Err(reject(format!(
                "chunk heat out of range: {}",
                chunk.pulse_state.heat
            )));
        }
        if !chunk.pulse_state.entropy.is_finite()
            || !(0.0..=1.0).contains(&chunk.pulse_state.entropy)
        {
            self.validation_rejects += 1;
            return Err(reject(format!(
                "chunk entropy out of range: {}",
                chunk.pulse_state.entropy
            )));
        }
        Ok(())
    }

    fn append_to_log(&self, chunk: &MemoryChunk) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.session_path)?;
        let line = serde_json::to_string(chunk)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    fn refresh_working(&mut self, id: Uuid) {
        if let Some(pos) = self.working.iter().position(|w| *w == id) {
            self.working.remove(pos);
            self.working.push_back(id);
        }
    }

    fn evict_least_significant(&mut self) {
        let Some((pos, _)) = self
            .significant
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let ia = self.importance.get(*a).copied().unwrap_or(0.0);
                let ib = self.importance.get(*b).copied().unwrap_or(0.0);
                ia.total_cmp(&ib)
            })
        else {
            return;
        };
        let evicted = self.significant.remove(pos);
        self.collect_if_orphaned(evicted);
    }

    /// Drop a chunk that no longer belongs to any pool.
    fn collect_if_orphaned(&mut self, id: Uuid) {
        let member = self.working.contains(&id)
            || self.recent.contains(&id)
            || self.significant.contains(&id);
        if !member {
            self.chunks.remove(&id);
            self.importance.remove(&id);
            self.order.retain(|o| *o != id);
        }
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn tag_words(chunk: &MemoryChunk) -> HashSet<String> {
    let mut tags: HashSet<String> = chunk.sigils.iter().map(|s| s.to_lowercase()).collect();
    if let Some(topic) = &chunk.topic {
        tags.extend(words(topic));
    }
    tags
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

fn set_jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// `1 - min(1, (|d_entropy| + |d_heat|/100 + |d_scup|) / 3)`
fn pulse_similarity(a: &PulseState, b: &PulseState) -> f64 {
    let distance = (a.entropy - b.entropy).abs()
        + (a.heat - b.heat).abs() / 100.0
        + (a.scup - b.scup).abs();
    1.0 - (distance / 3.0).min(1.0)
}
