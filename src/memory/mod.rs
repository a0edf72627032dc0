//! Threat intelligence memory: vector recall of past malicious messages.
//!
//! Append-only store of textual fingerprints with embeddings, supporting
//! nearest-neighbor search with temporal decay and capacity-bounded pruning.
//! Each record and its embedding live in one [`ThreatEntry`], so index
//! alignment is structural rather than maintained by convention.
//!
//! The store never raises to its caller: embedder outages degrade `search`
//! to an empty match and `record` to a sentinel id, and snapshot I/O failures
//! are logged and swallowed.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::collaborator::Embedder;
use crate::verdict::AttackType;

/// Floor for the temporal decay weight.
const DECAY_FLOOR: f64 = 0.1;
/// Stored text is truncated to this many characters.
const RECORD_TEXT_CHARS: usize = 500;
/// Sentinel id returned when the embedder is unavailable.
const SENTINEL_NO_EMBEDDER: &str = "no-embedder";

/// Threat memory tuning parameters.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Snapshot file; `None` keeps the store purely in-memory.
    pub path: Option<PathBuf>,
    /// Minimum decayed similarity for a match (inclusive).
    pub similarity_threshold: f64,
    /// Days until decay weight bottoms out at 0.1.
    pub decay_days: i64,
    /// Maximum records before pruning by last-seen.
    pub max_records: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            similarity_threshold: 0.85,
            decay_days: 90,
            max_records: 10_000,
        }
    }
}

/// A previously observed malicious message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatRecord {
    /// Content-derived stable id (sha-256 hex prefix).
    pub id: String,
    /// Truncated message text.
    pub text: String,
    /// Attack taxonomy entry.
    pub attack_type: AttackType,
    /// How many times this exact text has been seen.
    pub frequency: u32,
    /// First observation.
    pub first_seen: DateTime<Utc>,
    /// Most recent observation. Drives decay and pruning.
    pub last_seen: DateTime<Utc>,
    /// Sessions the text was observed in.
    pub sessions: Vec<String>,
}

/// One record plus its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThreatEntry {
    record: ThreatRecord,
    embedding: Vec<f32>,
}

/// Snapshot file layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    threats: Vec<ThreatEntry>,
}

/// Result of a threat memory search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatMatch {
    /// Matched record id, `None` when nothing cleared the threshold.
    pub matched_attack_id: Option<String>,
    /// Decay-weighted cosine similarity, rounded to 3 decimals.
    pub similarity_score: f64,
    /// Matched record's frequency.
    pub historical_frequency: u32,
    /// Matched record's attack type.
    pub attack_type: AttackType,
    /// Matched record's first-seen timestamp.
    pub first_seen: Option<DateTime<Utc>>,
    /// Matched record's last-seen timestamp.
    pub last_seen: Option<DateTime<Utc>>,
}

impl ThreatMatch {
    /// Whether the search cleared the similarity threshold.
    pub fn is_match(&self) -> bool {
        self.matched_attack_id.is_some()
    }
}

/// Summary statistics over the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Distinct records.
    pub total_threats: usize,
    /// Sum of record frequencies.
    pub total_attacks: u64,
    /// Frequency totals per attack type.
    pub attack_types: Vec<(AttackType, u64)>,
    /// Oldest first-seen timestamp.
    pub oldest_threat: Option<DateTime<Utc>>,
    /// Newest last-seen timestamp.
    pub newest_threat: Option<DateTime<Utc>>,
}

/// Disk-backed vector store of known malicious prompts with temporal decay.
pub struct ThreatMemoryStore {
    entries: RwLock<Vec<ThreatEntry>>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
}

impl ThreatMemoryStore {
    /// Create a store, loading the snapshot if configured. A missing or
    /// corrupt snapshot logs and starts empty; it never fails construction.
    pub fn new(embedder: Arc<dyn Embedder>, config: MemoryConfig) -> Self {
        let entries = match &config.path {
            Some(path) if path.exists() => match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<Snapshot>(&raw) {
                    Ok(snapshot) => {
                        info!(
                            path = %path.display(),
                            records = snapshot.threats.len(),
                            "Loaded threat memory snapshot"
                        );
                        snapshot.threats
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Corrupt threat memory snapshot, starting empty");
                        Vec::new()
                    }
                },
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to read threat memory snapshot, starting empty");
                    Vec::new()
                }
            },
            _ => {
                info!("No existing threat memory found. Starting fresh.");
                Vec::new()
            }
        };

        Self {
            entries: RwLock::new(entries),
            embedder,
            config,
        }
    }

    /// Content-derived stable id: first 16 hex chars of sha-256.
    pub fn threat_id(text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Search for a similar known attack. Returns an empty match when the
    /// store is empty, the embedder is down, or nothing clears the threshold.
    pub async fn search(&self, text: &str) -> ThreatMatch {
        {
            let entries = self.entries.read().await;
            if entries.is_empty() {
                return ThreatMatch::default();
            }
        }

        let query = match self.embedder.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Embedder unavailable, threat memory search skipped");
                return ThreatMatch::default();
            }
        };

        let now = Utc::now();
        let entries = self.entries.read().await;

        let mut best_score = 0.0_f64;
        let mut best: Option<&ThreatEntry> = None;

        for entry in entries.iter() {
            let similarity = cosine_similarity(&query, &entry.embedding);
            let weighted =
                similarity * decay_weight(entry.record.last_seen, now, self.config.decay_days);
            if weighted > best_score {
                best_score = weighted;
                best = Some(entry);
            }
        }

        match best {
            Some(entry) if best_score >= self.config.similarity_threshold => ThreatMatch {
                matched_attack_id: Some(entry.record.id.clone()),
                similarity_score: round3(best_score),
                historical_frequency: entry.record.frequency,
                attack_type: entry.record.attack_type,
                first_seen: Some(entry.record.first_seen),
                last_seen: Some(entry.record.last_seen),
            },
            _ => ThreatMatch::default(),
        }
    }

    /// Record a malicious message, or bump the existing record when the
    /// exact text has been seen before. Returns the record id, or a sentinel
    /// when the embedder is down for a new record.
    pub async fn record(&self, text: &str, attack_type: AttackType, session_id: &str) -> String {
        let id = Self::threat_id(text);
        let now = Utc::now();

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.iter_mut().find(|e| e.record.id == id) {
                entry.record.frequency += 1;
                entry.record.last_seen = now;
                entry.record.sessions.push(session_id.to_string());
                info!(
                    threat_id = %id,
                    frequency = entry.record.frequency,
                    "Updated known threat"
                );
                let snapshot_entries = entries.clone();
                drop(entries);
                self.save(&snapshot_entries);
                return id;
            }
        }

        // New record: embedding required.
        let embedding = match self.embedder.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Embedder unavailable, threat not recorded");
                return SENTINEL_NO_EMBEDDER.to_string();
            }
        };

        let mut entries = self.entries.write().await;
        // Lost the race with a concurrent recorder of the same text.
        if let Some(entry) = entries.iter_mut().find(|e| e.record.id == id) {
            entry.record.frequency += 1;
            entry.record.last_seen = now;
            entry.record.sessions.push(session_id.to_string());
        } else {
            let truncated: String = text.chars().take(RECORD_TEXT_CHARS).collect();
            entries.push(ThreatEntry {
                record: ThreatRecord {
                    id: id.clone(),
                    text: truncated,
                    attack_type,
                    frequency: 1,
                    first_seen: now,
                    last_seen: now,
                    sessions: vec![session_id.to_string()],
                },
                embedding,
            });
            info!(threat_id = %id, attack_type = %attack_type, "Recorded new threat");

            if entries.len() > self.config.max_records {
                prune_entries(&mut entries, self.config.max_records);
                info!(records = entries.len(), "Pruned threat memory");
            }
        }

        let snapshot_entries = entries.clone();
        drop(entries);
        self.save(&snapshot_entries);
        id
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Look up a record by id.
    pub async fn get(&self, id: &str) -> Option<ThreatRecord> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.record.id == id)
            .map(|e| e.record.clone())
    }

    /// Summary statistics.
    pub async fn stats(&self) -> MemoryStats {
        let entries = self.entries.read().await;
        if entries.is_empty() {
            return MemoryStats::default();
        }

        let mut attack_types: Vec<(AttackType, u64)> = Vec::new();
        for entry in entries.iter() {
            match attack_types
                .iter_mut()
                .find(|(t, _)| *t == entry.record.attack_type)
            {
                Some((_, count)) => *count += u64::from(entry.record.frequency),
                None => attack_types.push((
                    entry.record.attack_type,
                    u64::from(entry.record.frequency),
                )),
            }
        }

        MemoryStats {
            total_threats: entries.len(),
            total_attacks: entries.iter().map(|e| u64::from(e.record.frequency)).sum(),
            attack_types,
            oldest_threat: entries.iter().map(|e| e.record.first_seen).min(),
            newest_threat: entries.iter().map(|e| e.record.last_seen).max(),
        }
    }

    /// Persist the snapshot. Failures are logged, never raised.
    fn save(&self, entries: &[ThreatEntry]) {
        let Some(path) = &self.config.path else {
            return;
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(path = %path.display(), error = %e, "Failed to create threat memory directory");
                return;
            }
        }

        let snapshot = Snapshot {
            threats: entries.to_vec(),
        };
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(path, raw) {
                    error!(path = %path.display(), error = %e, "Failed to save threat memory");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize threat memory"),
        }
    }
}

/// Linear temporal decay: 1.0 at age 0, floor 0.1 at or beyond the horizon.
pub fn decay_weight(last_seen: DateTime<Utc>, now: DateTime<Utc>, decay_days: i64) -> f64 {
    let age_days = (now - last_seen).num_days().max(0);
    if decay_days <= 0 || age_days >= decay_days {
        return DECAY_FLOOR;
    }
    1.0 - (0.9 * age_days as f64 / decay_days as f64)
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero-norm
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Keep the `max` most recently seen entries, dropping the least recent
/// first. Ordering among the kept entries is preserved.
fn prune_entries(entries: &mut Vec<ThreatEntry>, max: usize) {
    if entries.len() <= max {
        return;
    }
    let mut by_recency: Vec<(usize, DateTime<Utc>)> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (i, e.record.last_seen))
        .collect();
    by_recency.sort_by(|a, b| b.1.cmp(&a.1));

    let mut keep: Vec<usize> = by_recency.into_iter().take(max).map(|(i, _)| i).collect();
    keep.sort_unstable();

    let mut kept = Vec::with_capacity(max);
    for i in keep {
        kept.push(entries[i].clone());
    }
    *entries = kept;
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
