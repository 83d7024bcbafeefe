use chrono::{DateTime, Utc};
use errors::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use strum::{Display, EnumString};

pub type Metadata = Map<String, Value>;

const MAX_NAMESPACE_ID_LEN: usize = 128;

/// Checks that a namespace id is usable as a file name and a collection name.
pub fn validate_namespace_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id.len() > MAX_NAMESPACE_ID_LEN {
        return Err(StoreError::invalid(format!(
            "namespace id must be 1-{MAX_NAMESPACE_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StoreError::invalid(format!(
            "namespace id `{id}` may only contain ASCII letters, digits, `_` and `-`"
        )));
    }
    Ok(())
}

/// Mints a fresh namespace id for callers that did not supply one.
pub fn mint_namespace_id() -> String {
    format!("ns_{}", uuid::Uuid::new_v4().simple())
}

/// Resolves an optional caller-supplied namespace id to a validated one.
pub fn resolve_namespace_id(id: Option<&str>) -> Result<String, StoreError> {
    match id {
        Some(id) => {
            validate_namespace_id(id)?;
            Ok(id.to_string())
        }
        None => Ok(mint_namespace_id()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub entity_count: usize,
}

/// Open entity type tag. Unrecognized tags are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityKind {
    Guideline,
    Policy,
    Trajectory,
    Other(String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Guideline => "guideline",
            EntityKind::Policy => "policy",
            EntityKind::Trajectory => "trajectory",
            EntityKind::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for EntityKind {
    fn from(value: &str) -> Self {
        match value {
            "guideline" => EntityKind::Guideline,
            "policy" => EntityKind::Policy,
            "trajectory" => EntityKind::Trajectory,
            other => EntityKind::Other(other.to_string()),
        }
    }
}

impl From<String> for EntityKind {
    fn from(value: String) -> Self {
        EntityKind::from(value.as_str())
    }
}

impl From<EntityKind> for String {
    fn from(value: EntityKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GuidelineCategory {
    Strategy,
    Recovery,
    Optimization,
}

/// Metadata carried by `guideline` entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuidelinePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<GuidelineCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl GuidelinePayload {
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn task_description(&self) -> Option<&str> {
        self.extra.get("task_description").and_then(Value::as_str)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyType {
    Playbook,
    IntentGuard,
    ToolGuide,
    ToolApproval,
    OutputFormatter,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerType {
    Keyword,
    NaturalLanguage,
    Always,
}

/// A policy trigger. Unset fields keep their defaults implicit so that the
/// stored metadata round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTrigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl PolicyTrigger {
    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or("intent")
    }

    pub fn operator(&self) -> &str {
        self.operator.as_deref().unwrap_or("or")
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.unwrap_or(0.7)
    }
}

/// Metadata carried by `policy` entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<PolicyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<PolicyTrigger>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl PolicyPayload {
    pub fn priority(&self) -> i64 {
        self.priority.unwrap_or(50)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn triggers(&self) -> &[PolicyTrigger] {
        self.triggers.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Metadata carried by `trajectory` entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Type-specific entity metadata, validated where the entity type is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntityPayload {
    Guideline(GuidelinePayload),
    Policy(PolicyPayload),
    Trajectory(TrajectoryPayload),
    Opaque(Metadata),
}

impl EntityPayload {
    /// Parses a raw metadata map for the given entity type.
    pub fn from_metadata(kind: &EntityKind, metadata: Metadata) -> Result<Self, StoreError> {
        let value = Value::Object(metadata);
        let malformed =
            |e: serde_json::Error| StoreError::invalid(format!("malformed {kind} metadata: {e}"));

        Ok(match kind {
            EntityKind::Guideline => {
                EntityPayload::Guideline(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityKind::Policy => {
                EntityPayload::Policy(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityKind::Trajectory => {
                EntityPayload::Trajectory(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityKind::Other(_) => match value {
                Value::Object(map) => EntityPayload::Opaque(map),
                _ => EntityPayload::Opaque(Metadata::new()),
            },
        })
    }

    /// Flattens the payload back into the persisted metadata map.
    pub fn to_metadata(&self) -> Metadata {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Metadata::new(),
        }
    }

    pub fn empty_for(kind: &EntityKind) -> Self {
        match kind {
            EntityKind::Guideline => EntityPayload::Guideline(GuidelinePayload::default()),
            EntityKind::Policy => EntityPayload::Policy(PolicyPayload::default()),
            EntityKind::Trajectory => EntityPayload::Trajectory(TrajectoryPayload::default()),
            EntityKind::Other(_) => EntityPayload::Opaque(Metadata::new()),
        }
    }

    fn matches_kind(&self, kind: &EntityKind) -> bool {
        matches!(
            (self, kind),
            (EntityPayload::Guideline(_), EntityKind::Guideline)
                | (EntityPayload::Policy(_), EntityKind::Policy)
                | (EntityPayload::Trajectory(_), EntityKind::Trajectory)
                | (EntityPayload::Opaque(_), EntityKind::Other(_))
        )
    }
}

/// An entity that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub content: String,
    #[serde(rename = "metadata")]
    pub payload: EntityPayload,
}

impl NewEntity {
    /// Builds a candidate from an untyped metadata map, validating it against
    /// the entity type.
    pub fn new(
        kind: impl Into<EntityKind>,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Self, StoreError> {
        let kind = kind.into();
        // Typed payloads store an unset field as an absent key, so an explicit
        // null could not be read back.
        if !matches!(kind, EntityKind::Other(_))
            && let Some(key) = metadata.iter().find_map(|(k, v)| v.is_null().then_some(k))
        {
            return Err(StoreError::invalid(format!(
                "{kind} metadata key `{key}` is null; omit it instead"
            )));
        }
        let payload = EntityPayload::from_metadata(&kind, metadata)?;
        let entity = Self {
            kind,
            content: content.into(),
            payload,
        };
        entity.validate()?;
        Ok(entity)
    }

    pub fn guideline(content: impl Into<String>, payload: GuidelinePayload) -> Self {
        Self {
            kind: EntityKind::Guideline,
            content: content.into(),
            payload: EntityPayload::Guideline(payload),
        }
    }

    pub fn policy(content: impl Into<String>, payload: PolicyPayload) -> Self {
        Self {
            kind: EntityKind::Policy,
            content: content.into(),
            payload: EntityPayload::Policy(payload),
        }
    }

    pub fn trajectory(content: impl Into<String>, payload: TrajectoryPayload) -> Self {
        Self {
            kind: EntityKind::Trajectory,
            content: content.into(),
            payload: EntityPayload::Trajectory(payload),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.content.trim().is_empty() {
            return Err(StoreError::invalid("content must not be empty"));
        }
        if self.kind.as_str().is_empty() {
            return Err(StoreError::invalid("type must not be empty"));
        }
        if !self.payload.matches_kind(&self.kind) {
            return Err(StoreError::invalid(format!(
                "metadata shape does not match entity type `{}`",
                self.kind
            )));
        }
        Ok(())
    }

    pub fn metadata(&self) -> Metadata {
        self.payload.to_metadata()
    }
}

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub id: String,
    pub namespace_id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub content: String,
    #[serde(rename = "metadata")]
    pub payload: EntityPayload,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn metadata(&self) -> Metadata {
        self.payload.to_metadata()
    }

    /// True if type, content and metadata equal the candidate's.
    pub fn same_fields_as(&self, candidate: &NewEntity) -> bool {
        self.kind == candidate.kind
            && self.content == candidate.content
            && self.payload == candidate.payload
    }

    pub fn as_guideline(&self) -> Option<&GuidelinePayload> {
        match &self.payload {
            EntityPayload::Guideline(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_trajectory(&self) -> Option<&TrajectoryPayload> {
        match &self.payload {
            EntityPayload::Trajectory(p) => Some(p),
            _ => None,
        }
    }
}

/// Type and exact-match metadata filters for listing and searching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityQuery {
    pub kind: Option<EntityKind>,
    pub filters: Metadata,
}

impl EntityQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_kind(kind: impl Into<EntityKind>) -> Self {
        Self {
            kind: Some(kind.into()),
            filters: Metadata::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(kind) = &self.kind {
            if &entity.kind != kind {
                return false;
            }
        }
        if self.filters.is_empty() {
            return true;
        }
        let metadata = entity.metadata();
        self.filters
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// A search result with its backend-specific relevance score. Higher is more
/// relevant; the scale depends on the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub entity: Entity,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHealth {
    pub backend: String,
    pub status: crate::traits::HealthStatus,
    pub detail: Option<String>,
}

/// What the conflict resolution decision engine may decide for a candidate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResolutionAction {
    Insert,
    Merge,
    Supersede,
    Discard,
}

/// A decision engine's verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub action: ResolutionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl Verdict {
    pub fn insert() -> Self {
        Self {
            action: ResolutionAction::Insert,
            merged_content: None,
            target_id: None,
        }
    }

    pub fn discard(target_id: impl Into<String>) -> Self {
        Self {
            action: ResolutionAction::Discard,
            merged_content: None,
            target_id: Some(target_id.into()),
        }
    }

    pub fn supersede(target_id: impl Into<String>) -> Self {
        Self {
            action: ResolutionAction::Supersede,
            merged_content: None,
            target_id: Some(target_id.into()),
        }
    }

    pub fn merge(target_id: impl Into<String>, merged_content: impl Into<String>) -> Self {
        Self {
            action: ResolutionAction::Merge,
            merged_content: Some(merged_content.into()),
            target_id: Some(target_id.into()),
        }
    }
}

/// A guideline proposed by the generation service, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineDraft {
    pub content: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub trigger: String,
}

impl GuidelineDraft {
    /// Converts the draft into a guideline candidate. Unknown categories are
    /// dropped rather than rejected.
    pub fn into_payload(self) -> (String, GuidelinePayload) {
        let payload = GuidelinePayload {
            rationale: Some(self.rationale).filter(|s| !s.is_empty()),
            category: self.category.parse().ok(),
            trigger: Some(self.trigger).filter(|s| !s.is_empty()),
            extra: Metadata::new(),
        };
        (self.content, payload)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedGuidelines {
    #[serde(default, alias = "tips")]
    pub guidelines: Vec<GuidelineDraft>,
    #[serde(default)]
    pub task_description: Option<String>,
}
