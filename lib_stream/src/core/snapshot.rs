//! # Snapshot Model
//!
//! A [`Snapshot`] is one decoded stream message: a set of independently
//! optional, typed [`Section`]s. Snapshots are point-in-time values; the core
//! never merges them. A section missing from a snapshot means "no update this
//! tick", never "cleared".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::feed::FeedEntry;

/// The known section names of the multiplexed stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionName {
    /// Headline metrics and service health.
    Overview,
    /// Edge training worker records.
    Workers,
    /// The latest ledger block (ledger tip).
    Blockchain,
    /// Federated training metrics.
    TrainingMetrics,
    /// Security control plane status.
    Security,
}

impl SectionName {
    /// Every known section, in wire order.
    pub const ALL: [SectionName; 5] = [
        SectionName::Overview,
        SectionName::Workers,
        SectionName::Blockchain,
        SectionName::TrainingMetrics,
        SectionName::Security,
    ];

    /// Top-level JSON key of the section.
    pub fn wire_key(self) -> &'static str {
        match self {
            SectionName::Overview => "overview",
            SectionName::Workers => "workers",
            SectionName::Blockchain => "blockchain",
            SectionName::TrainingMetrics => "training",
            SectionName::Security => "security",
        }
    }

    pub fn from_wire_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.wire_key() == key)
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_key())
    }
}

/// A metric value as the backend sends it: either a display string ("1/5",
/// "100%") or a bare number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// Interprets the value as a non-negative count.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            MetricValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
            MetricValue::Number(_) => None,
            MetricValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{}", n),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewMetric {
    pub label: String,
    pub value: MetricValue,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
    pub uptime: f64,
}

/// The `overview` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub metrics: Vec<OverviewMetric>,
    #[serde(default)]
    pub services: Vec<ServiceStatus>,
}

impl Overview {
    /// Label of the metric carrying the authoritative ledger block count.
    pub const MODELS_VERIFIED: &'static str = "Models Verified";

    pub fn metric(&self, label: &str) -> Option<&OverviewMetric> {
        self.metrics.iter().find(|m| m.label == label)
    }

    /// Number of anchored model blocks, if the backend reported it.
    pub fn models_verified(&self) -> Option<u64> {
        self.metric(Self::MODELS_VERIFIED).and_then(|m| m.value.as_count())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Training,
    Idle,
    #[serde(other)]
    Unknown,
}

/// One entry of the `workers` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub samples: Option<u64>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, alias = "lastUpdate")]
    pub last_update: Option<String>,
}

/// The `blockchain` section: the current ledger tip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTip {
    pub latest_block: Option<FeedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedMetric {
    pub label: String,
    pub value: f64,
    #[serde(default)]
    pub target: Option<f64>,
}

/// The `training` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    #[serde(default)]
    pub round: Option<u64>,
    pub metrics: Vec<NamedMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetric {
    pub label: String,
    pub value: MetricValue,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub time: Option<String>,
}

/// The `security` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityStatus {
    pub metrics: Vec<SecurityMetric>,
    #[serde(default)]
    pub events: Vec<SecurityEvent>,
}

/// A typed section value. Handlers receive exactly the variant they subscribed to.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Overview(Overview),
    Workers(Vec<WorkerRecord>),
    Blockchain(LedgerTip),
    TrainingMetrics(TrainingMetrics),
    Security(SecurityStatus),
}

impl Section {
    pub fn name(&self) -> SectionName {
        match self {
            Section::Overview(_) => SectionName::Overview,
            Section::Workers(_) => SectionName::Workers,
            Section::Blockchain(_) => SectionName::Blockchain,
            Section::TrainingMetrics(_) => SectionName::TrainingMetrics,
            Section::Security(_) => SectionName::Security,
        }
    }
}

/// A known section that was present but failed shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRejection {
    pub section: SectionName,
    pub reason: String,
}

/// One decoded stream message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    sections: Vec<Section>,
    rejected: Vec<SectionRejection>,
}

impl Snapshot {
    pub fn from_sections(sections: Vec<Section>) -> Self {
        Self {
            sections,
            rejected: Vec::new(),
        }
    }

    pub(crate) fn with_rejections(sections: Vec<Section>, rejected: Vec<SectionRejection>) -> Self {
        Self { sections, rejected }
    }

    /// Sections present in this message.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn get(&self, name: SectionName) -> Option<&Section> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn contains(&self, name: SectionName) -> bool {
        self.get(name).is_some()
    }

    /// Known sections dropped because their shape did not validate.
    pub fn rejected(&self) -> &[SectionRejection] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
