//! Versioned message schema carried on the stage streams
//!
//! Every payload is a flat JSON object `{"v": 1, "type": "<kind>", ...fields}`. The
//! version is checked before anything else, so a producer running a newer schema is
//! rejected explicitly instead of being half-understood.

use serde::{Deserialize, Serialize};

use crate::error::{Error, QueueError, Result};
use crate::types::{JobId, Stage};

/// Schema version written by [`StreamMessage::encode`] and accepted by [`StreamMessage::decode`]
pub const SCHEMA_VERSION: u32 = 1;

/// A unit of work on one of the stage streams
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Split the uploaded source of a job into units
    ChunkSource {
        /// Job to chunk
        job_id: JobId,
        /// Where the source text lives
        object_key: String,
    },
    /// Analyze a single unit
    AnalyzeUnit {
        /// Owning job
        job_id: JobId,
        /// 0-based unit index
        unit_index: i64,
    },
    /// Analyze every remaining unit of a job, starting after its checkpoint
    ResumeAnalysis {
        /// Job to resume
        job_id: JobId,
    },
    /// Build the character graph of an analyzed job
    GenerateGraph {
        /// Job to aggregate
        job_id: JobId,
    },
}

impl StreamMessage {
    /// Job the message refers to
    pub fn job_id(&self) -> JobId {
        match self {
            StreamMessage::ChunkSource { job_id, .. }
            | StreamMessage::AnalyzeUnit { job_id, .. }
            | StreamMessage::ResumeAnalysis { job_id }
            | StreamMessage::GenerateGraph { job_id } => *job_id,
        }
    }

    /// Value of the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::ChunkSource { .. } => "chunk_source",
            StreamMessage::AnalyzeUnit { .. } => "analyze_unit",
            StreamMessage::ResumeAnalysis { .. } => "resume_analysis",
            StreamMessage::GenerateGraph { .. } => "generate_graph",
        }
    }

    /// Stage whose stream carries this message
    pub fn stage(&self) -> Stage {
        match self {
            StreamMessage::ChunkSource { .. } => Stage::Chunking,
            StreamMessage::AnalyzeUnit { .. } | StreamMessage::ResumeAnalysis { .. } => {
                Stage::Analysis
            }
            StreamMessage::GenerateGraph { .. } => Stage::Graph,
        }
    }

    /// Field-level checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.job_id().get() <= 0 {
            return Err(Error::Validation(format!(
                "{}: job_id must be positive, got {}",
                self.kind(),
                self.job_id()
            )));
        }

        match self {
            StreamMessage::ChunkSource { object_key, .. } if object_key.trim().is_empty() => Err(
                Error::Validation("chunk_source: object_key must not be empty".into()),
            ),
            StreamMessage::AnalyzeUnit { unit_index, .. } if *unit_index < 0 => {
                Err(Error::Validation(format!(
                    "analyze_unit: unit_index must not be negative, got {}",
                    unit_index
                )))
            }
            _ => Ok(()),
        }
    }

    /// Serialize with the schema version attached
    pub fn encode(&self) -> Result<String> {
        self.validate()?;

        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("v".into(), SCHEMA_VERSION.into());
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Parse and validate a payload read from a stream
    pub fn decode(payload: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| QueueError::InvalidMessage(format!("payload is not JSON: {}", e)))?;

        let map = value.as_object_mut().ok_or_else(|| {
            QueueError::InvalidMessage("payload is not a JSON object".to_string())
        })?;

        let version = map
            .remove("v")
            .ok_or_else(|| QueueError::InvalidMessage("missing schema version 'v'".to_string()))?;
        let version = version.as_u64().ok_or_else(|| {
            QueueError::InvalidMessage(format!(
                "schema version must be a non-negative integer, got {}",
                version
            ))
        })?;
        if version != u64::from(SCHEMA_VERSION) {
            return Err(QueueError::UnsupportedVersion {
                found: version,
                expected: SCHEMA_VERSION,
            }
            .into());
        }

        let message: StreamMessage = serde_json::from_value(value)
            .map_err(|e| QueueError::InvalidMessage(e.to_string()))?;
        message.validate()?;

        Ok(message)
    }
}
