//! Command journal and checkpoints.
//!
//! Every command a market writer accepts is appended to that market's
//! journal before its effects apply. Recovery loads the latest checkpoint
//! (ledger + market + engine state) and replays the journal tail by
//! sequence number; because order and trade IDs are deterministic, replay
//! reconstructs the same books, reserves, and positions.
//!
//! Deposits and withdrawals are upstream of the markets and are captured
//! by checkpoints only; the journal records market commands.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use openpredict_types::{
    Market, MarketId, MarketState, OpenpredictError, Order, OrderId, Resolution, Result, UserId,
};

use crate::engine::EngineState;
use crate::ledger::LedgerSnapshot;

/// A market command as accepted by its writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalCommand {
    CreateMarket {
        market: Market,
    },
    /// The order exactly as admitted (ID and arrival sequence assigned).
    Submit {
        order: Order,
    },
    Cancel {
        order_id: OrderId,
    },
    Transition {
        to: MarketState,
        resolution: Option<Resolution>,
    },
    SeedPool {
        provider: UserId,
        r_yes: u64,
        r_no: u64,
    },
    AddLiquidity {
        provider: UserId,
        amount: u64,
    },
    RemoveLiquidity {
        provider: UserId,
        shares: u64,
    },
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// The market's command sequence number.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub command: JournalCommand,
}

/// Snapshot of one market and its engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCheckpoint {
    pub market: Market,
    pub engine: EngineState,
    pub command_seq: u64,
    pub event_seq: u64,
}

/// Full engine checkpoint: the ledger plus every market.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ledger: LedgerSnapshot,
    pub markets: Vec<MarketCheckpoint>,
    pub taken_at: Option<DateTime<Utc>>,
}

/// Storage for journals and checkpoints.
pub trait JournalStore: Send + Sync + std::fmt::Debug {
    /// Append an accepted command to a market's journal.
    fn append(&self, market: MarketId, entry: &JournalEntry) -> Result<()>;

    /// All journal entries for a market, in sequence order.
    fn entries(&self, market: MarketId) -> Result<Vec<JournalEntry>>;

    /// Markets with journal entries.
    fn markets(&self) -> Result<Vec<MarketId>>;

    /// Replace the stored checkpoint.
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// The latest stored checkpoint, if any.
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>>;

    /// Drop a market's entries with `seq <= up_to` (covered by a
    /// checkpoint).
    fn truncate(&self, market: MarketId, up_to: u64) -> Result<()>;
}

// ===================================================================
// In-memory store
// ===================================================================

/// Journal store backed by memory. The default for tests and for
/// deployments that delegate durability elsewhere.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<HashMap<MarketId, Vec<JournalEntry>>>,
    checkpoint: Mutex<Option<Checkpoint>>,
}

impl MemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalStore for MemoryJournal {
    fn append(&self, market: MarketId, entry: &JournalEntry) -> Result<()> {
        self.entries
            .lock()
            .entry(market)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn entries(&self, market: MarketId) -> Result<Vec<JournalEntry>> {
        Ok(self
            .entries
            .lock()
            .get(&market)
            .cloned()
            .unwrap_or_default())
    }

    fn markets(&self) -> Result<Vec<MarketId>> {
        let mut ids: Vec<MarketId> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.checkpoint.lock() = Some(checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoint.lock().clone())
    }

    fn truncate(&self, market: MarketId, up_to: u64) -> Result<()> {
        if let Some(entries) = self.entries.lock().get_mut(&market) {
            entries.retain(|e| e.seq > up_to);
        }
        Ok(())
    }
}

// ===================================================================
// File-backed store
// ===================================================================

/// Journal store writing JSON lines, one file per market, plus a
/// `checkpoint.json`, inside one directory.
#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    /// Serialises appends against truncation.
    lock: Mutex<()>,
}

impl FileJournal {
    /// Open (creating if needed) a journal directory.
    ///
    /// # Errors
    /// I/O errors creating the directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "journal directory ready");
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn market_path(&self, market: MarketId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", market.0))
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join("checkpoint.json")
    }
}

impl JournalStore for FileJournal {
    fn append(&self, market: MarketId, entry: &JournalEntry) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.market_path(market))?;
        let line = serde_json::to_string(entry)
            .map_err(|e| OpenpredictError::Serialization(e.to_string()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn entries(&self, market: MarketId) -> Result<Vec<JournalEntry>> {
        let _guard = self.lock.lock();
        let path = self.market_path(market);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)
                .map_err(|e| OpenpredictError::Serialization(e.to_string()))?;
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    fn markets(&self) -> Result<Vec<MarketId>> {
        let _guard = self.lock.lock();
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(uuid) = stem.parse() {
                        ids.push(MarketId(uuid));
                    }
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.lock.lock();
        let json = serde_json::to_vec(checkpoint)
            .map_err(|e| OpenpredictError::Serialization(e.to_string()))?;
        // Write-then-rename so a crash mid-write never corrupts the
        // previous checkpoint.
        let tmp = self.dir.join("checkpoint.json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.checkpoint_path())?;
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let _guard = self.lock.lock();
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let checkpoint = serde_json::from_slice(&bytes)
            .map_err(|e| OpenpredictError::Serialization(e.to_string()))?;
        Ok(Some(checkpoint))
    }

    fn truncate(&self, market: MarketId, up_to: u64) -> Result<()> {
        let kept: Vec<JournalEntry> = self
            .entries(market)?
            .into_iter()
            .filter(|e| e.seq > up_to)
            .collect();
        let _guard = self.lock.lock();
        let mut file = File::create(self.market_path(market))?;
        for entry in &kept {
            let line = serde_json::to_string(entry)
                .map_err(|e| OpenpredictError::Serialization(e.to_string()))?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
