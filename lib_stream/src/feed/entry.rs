//! Ledger feed entries.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// When a ledger block was written: epoch seconds from the node, or a display
/// label some endpoints send pre-formatted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryTime {
    Epoch(f64),
    Label(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A verified aggregated model anchored by a training round.
    ModelUpdate,
    /// A document content id anchored by an upload.
    DocumentAnchor,
}

/// One immutable ledger record. Identity is `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(alias = "block")]
    pub index: u64,
    #[serde(default, alias = "hash", skip_serializing_if = "Option::is_none")]
    pub model_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_num: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<EntryTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

impl FeedEntry {
    /// A bare entry with only its identity set.
    pub fn new(index: u64) -> Self {
        Self {
            index,
            model_hash: None,
            previous_hash: None,
            round_num: None,
            timestamp: None,
            doc_cid: None,
            doc_name: None,
            verified: None,
        }
    }

    pub fn key(&self) -> u64 {
        self.index
    }

    pub fn kind(&self) -> EntryKind {
        if self.doc_cid.is_some() {
            EntryKind::DocumentAnchor
        } else {
            EntryKind::ModelUpdate
        }
    }

    /// The anchored hash (model hash or document CID) cut to ten characters.
    pub fn short_hash(&self) -> Option<String> {
        let full = self.model_hash.as_deref().or(self.doc_cid.as_deref())?;
        if full.chars().count() <= 10 {
            return Some(full.to_string());
        }
        let head: String = full.chars().take(10).collect();
        Some(format!("{}...", head))
    }

    /// `HH:MM:SS` in UTC for epoch timestamps, the label itself otherwise.
    pub fn time_label(&self) -> Option<String> {
        match self.timestamp.as_ref()? {
            EntryTime::Label(label) => Some(label.clone()),
            EntryTime::Epoch(secs) => {
                let whole = secs.trunc() as i64;
                let nanos = (secs.fract() * 1e9) as u32;
                DateTime::from_timestamp(whole, nanos).map(|t| t.format("%H:%M:%S").to_string())
            }
        }
    }
}

impl fmt::Display for FeedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)?;
        match self.kind() {
            EntryKind::DocumentAnchor => {
                write!(f, " doc {}", self.doc_name.as_deref().unwrap_or("<unnamed>"))?;
            }
            EntryKind::ModelUpdate => {
                if let Some(round) = self.round_num {
                    write!(f, " round {}", round)?;
                }
            }
        }
        if let Some(hash) = self.short_hash() {
            write!(f, " {}", hash)?;
        }
        Ok(())
    }
}
