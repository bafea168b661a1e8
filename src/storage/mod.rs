//! Persistence layer.
//!
//! The ledger journal is an append-only JSON-lines file of `JournalRecord`s:
//! every ledger entry plus the breaker and halt events that are not ledger
//! entries. All derived state is rebuilt by replaying it from empty.
//! The price feed is read from a JSON-lines file of observations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::types::{LedgerEntry, PriceObservation, SignerId, TripReason};

/// Default journal file path.
pub const DEFAULT_JOURNAL_FILE: &str = "ramstrat_journal.jsonl";

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    Entry(LedgerEntry),
    BreakerTrip {
        reason: TripReason,
        at: DateTime<Utc>,
    },
    BreakerReset {
        signers: Vec<SignerId>,
        at: DateTime<Utc>,
    },
    /// Integrity violation; trading stops until cleared.
    Halt {
        reason: String,
        at: DateTime<Utc>,
    },
    HaltCleared {
        note: String,
        at: DateTime<Utc>,
    },
    CustodyConfirmed {
        entry_id: u64,
        #[serde(with = "rust_decimal::serde::str")]
        amount: Decimal,
        tx_id: String,
        at: DateTime<Utc>,
    },
}

/// Append records to the journal, creating it if needed.
pub fn append_records(records: &[JournalRecord], path: Option<&str>) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let path = path.unwrap_or(DEFAULT_JOURNAL_FILE);

    let mut buf = String::new();
    for record in records {
        let line = serde_json::to_string(record).context("Failed to serialise journal record")?;
        buf.push_str(&line);
        buf.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(format!("Failed to open journal {path}"))?;
    file.write_all(buf.as_bytes())
        .context(format!("Failed to append to journal {path}"))?;
    file.sync_data()
        .context(format!("Failed to sync journal {path}"))?;

    debug!(path, records = records.len(), "Journal appended");
    Ok(())
}

/// Load the full journal. A missing file is an empty journal (fresh start).
///
/// A malformed line is an error: the journal is the canonical record and
/// silently skipping part of it would corrupt the replay.
pub fn load_journal(path: Option<&str>) -> Result<Vec<JournalRecord>> {
    let path = path.unwrap_or(DEFAULT_JOURNAL_FILE);

    if !Path::new(path).exists() {
        info!(path, "No journal found, starting fresh");
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path).context(format!("Failed to open journal {path}"))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context(format!("Failed to read journal {path}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: JournalRecord = serde_json::from_str(&line)
            .context(format!("Malformed journal record at {path}:{}", index + 1))?;
        records.push(record);
    }

    info!(path, records = records.len(), "Journal loaded from disk");
    Ok(records)
}

/// Delete the journal (for testing or reset).
pub fn delete_journal(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_JOURNAL_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete journal {path}"))?;
    }
    Ok(())
}

/// Read price observations appended to a JSON-lines feed since byte
/// `offset`. Returns the observations and the offset to resume from.
/// Malformed lines are logged and skipped; a trailing partial line is left
/// for the next read.
pub fn read_feed(path: &str, offset: u64) -> Result<(Vec<PriceObservation>, u64)> {
    if !Path::new(path).exists() {
        return Ok((Vec::new(), offset));
    }

    let mut file = std::fs::File::open(path).context(format!("Failed to open price feed {path}"))?;
    let len = file.metadata().context("Failed to stat price feed")?.len();
    // Truncated or rotated feed: start over.
    let start = if offset > len { 0 } else { offset };
    file.seek(SeekFrom::Start(start))
        .context("Failed to seek price feed")?;

    let mut reader = BufReader::new(file);
    let mut observations = Vec::new();
    let mut consumed = start;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .context(format!("Failed to read price feed {path}"))?;
        if n == 0 || !line.ends_with('\n') {
            break;
        }
        consumed += n as u64;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<PriceObservation>(trimmed) {
            Ok(obs) => observations.push(obs),
            Err(e) => warn!(path, error = %e, "Skipping malformed price observation"),
        }
    }

    Ok((observations, consumed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
