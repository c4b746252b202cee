//! Core types for scene-pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for a job
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Job status
///
/// Stored as its snake_case name so status-indexed dashboard queries stay readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job record exists, no source yet
    Created,
    /// Client is uploading the source
    Uploading,
    /// Upload confirmed by the storage boundary
    Uploaded,
    /// Waiting for a chunking worker
    QueuedForChunking,
    /// Source is being split into units
    Chunking,
    /// Splitting failed (operator may resubmit)
    ChunkingFailed,
    /// Units persisted
    ChunkingComplete,
    /// Units enqueued for analysis
    QueuedForAnalysis,
    /// Units are being analyzed
    Analyzing,
    /// At least one unit ended in error (operator may resubmit)
    AnalysisFailed,
    /// Every unit analyzed
    AnalysisComplete,
    /// Character graph is being built
    GeneratingGraph,
    /// Graph generation failed (operator may resubmit)
    GraphGenerationFailed,
    /// Graph stored
    GraphGenerationComplete,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl JobStatus {
    /// Every status, in pipeline order
    pub const ALL: [JobStatus; 16] = [
        JobStatus::Created,
        JobStatus::Uploading,
        JobStatus::Uploaded,
        JobStatus::QueuedForChunking,
        JobStatus::Chunking,
        JobStatus::ChunkingFailed,
        JobStatus::ChunkingComplete,
        JobStatus::QueuedForAnalysis,
        JobStatus::Analyzing,
        JobStatus::AnalysisFailed,
        JobStatus::AnalysisComplete,
        JobStatus::GeneratingGraph,
        JobStatus::GraphGenerationFailed,
        JobStatus::GraphGenerationComplete,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Storage and wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Uploading => "uploading",
            JobStatus::Uploaded => "uploaded",
            JobStatus::QueuedForChunking => "queued_for_chunking",
            JobStatus::Chunking => "chunking",
            JobStatus::ChunkingFailed => "chunking_failed",
            JobStatus::ChunkingComplete => "chunking_complete",
            JobStatus::QueuedForAnalysis => "queued_for_analysis",
            JobStatus::Analyzing => "analyzing",
            JobStatus::AnalysisFailed => "analysis_failed",
            JobStatus::AnalysisComplete => "analysis_complete",
            JobStatus::GeneratingGraph => "generating_graph",
            JobStatus::GraphGenerationFailed => "graph_generation_failed",
            JobStatus::GraphGenerationComplete => "graph_generation_complete",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// `completed` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// One of the `*_failed` stage states
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::ChunkingFailed | JobStatus::AnalysisFailed | JobStatus::GraphGenerationFailed
        )
    }

    /// Nothing will move this job without an operator: terminal or a stage failure.
    ///
    /// Progress streams close after an event carrying a settled status.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || self.is_stage_failure()
    }

    /// The actor allowed to write `from -> to`, if the edge exists at all
    pub fn owner_of(from: JobStatus, to: JobStatus) -> Option<Actor> {
        use JobStatus::*;

        match (from, to) {
            (Created, Uploading) | (Created, Uploaded) | (Uploading, Uploaded) => {
                Some(Actor::Intake)
            }
            (Uploaded, QueuedForChunking) => Some(Actor::Intake),

            (QueuedForChunking, Chunking)
            | (Chunking, ChunkingComplete)
            | (Chunking, ChunkingFailed)
            | (Chunking, Failed)
            | (ChunkingComplete, QueuedForAnalysis)
            | (ChunkingComplete, Completed) => Some(Actor::Chunking),

            (QueuedForAnalysis, Analyzing)
            | (Analyzing, AnalysisComplete)
            | (Analyzing, AnalysisFailed)
            | (Analyzing, Failed) => Some(Actor::Analysis),

            (AnalysisComplete, GeneratingGraph)
            | (GeneratingGraph, GraphGenerationComplete)
            | (GeneratingGraph, GraphGenerationFailed)
            | (GraphGenerationComplete, Completed) => Some(Actor::Graph),

            (ChunkingFailed, QueuedForChunking)
            | (AnalysisFailed, QueuedForAnalysis)
            | (GraphGenerationFailed, AnalysisComplete)
            | (ChunkingFailed, Failed)
            | (AnalysisFailed, Failed)
            | (GraphGenerationFailed, Failed) => Some(Actor::Operator),

            _ => None,
        }
    }

    /// Where an operator re-submission puts a job sitting in this stage failure
    pub fn resubmit_target(&self) -> Option<JobStatus> {
        match self {
            JobStatus::ChunkingFailed => Some(JobStatus::QueuedForChunking),
            JobStatus::AnalysisFailed => Some(JobStatus::QueuedForAnalysis),
            JobStatus::GraphGenerationFailed => Some(JobStatus::AnalysisComplete),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let name = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(name.parse::<JobStatus>()?)
    }
}

/// Who is writing a job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// Upload/notify boundary
    Intake,
    /// Chunking stage workers
    Chunking,
    /// Analysis stage workers
    Analysis,
    /// Graph generation workers
    Graph,
    /// Human operator (resubmission, abandonment)
    Operator,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Actor::Intake => "intake",
            Actor::Chunking => "chunking",
            Actor::Analysis => "analysis",
            Actor::Graph => "graph",
            Actor::Operator => "operator",
        };
        f.write_str(name)
    }
}

/// Worker stage with its own stream, consumer group and checkpoint namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Split sources into units
    Chunking,
    /// Analyze units
    Analysis,
    /// Build the character graph
    Graph,
}

impl Stage {
    /// All worker stages
    pub const ALL: [Stage; 3] = [Stage::Chunking, Stage::Analysis, Stage::Graph];

    /// Stream carrying this stage's work
    pub fn stream(&self) -> &'static str {
        match self {
            Stage::Chunking => "stream_source_chunks",
            Stage::Analysis => "stream_scene_analysis",
            Stage::Graph => "stream_graph_generation",
        }
    }

    /// Consumer group shared by this stage's workers
    pub fn group(&self) -> &'static str {
        match self {
            Stage::Chunking => "group_chunk_workers",
            Stage::Analysis => "group_analysis_workers",
            Stage::Graph => "group_graph_workers",
        }
    }

    /// Name used in checkpoint keys (`"{job_id}:{name}"`)
    pub fn checkpoint_name(&self) -> &'static str {
        match self {
            Stage::Chunking => "chunking",
            Stage::Analysis => "scene_analysis",
            Stage::Graph => "graph_generation",
        }
    }

    /// The actor that owns this stage's transitions
    pub fn actor(&self) -> Actor {
        match self {
            Stage::Chunking => Actor::Chunking,
            Stage::Analysis => Actor::Analysis,
            Stage::Graph => Actor::Graph,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.checkpoint_name())
    }
}

/// Unit processing status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Not yet picked up
    Pending,
    /// A worker is analyzing it
    Processing,
    /// Result persisted
    Done,
    /// Last attempt failed
    Error,
}

impl UnitStatus {
    /// Convert integer status code to UnitStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => UnitStatus::Pending,
            1 => UnitStatus::Processing,
            2 => UnitStatus::Done,
            3 => UnitStatus::Error,
            _ => UnitStatus::Error,
        }
    }

    /// Convert UnitStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            UnitStatus::Pending => 0,
            UnitStatus::Processing => 1,
            UnitStatus::Done => 2,
            UnitStatus::Error => 3,
        }
    }

    /// `done` or `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Done | UnitStatus::Error)
    }
}

/// Job as exposed to API clients
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    /// Job id
    pub id: JobId,
    /// Caller-supplied reference to the source (file name, upload id, ...)
    pub source_ref: String,
    /// Object-storage key of the uploaded source, once confirmed
    pub object_key: Option<String>,
    /// Current status
    pub status: JobStatus,
    /// Last human-readable status note
    pub status_message: Option<String>,
    /// Number of units produced by the splitter
    pub total_units: i64,
    /// Units that reached `done` or `error`
    pub processed_units: i64,
    /// Units in `error`
    pub failed_units: i64,
    /// 0.0 to 100.0
    pub progress: f32,
    /// Reason for a failed status
    pub error_message: Option<String>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Last status or counter change
    pub updated_at: DateTime<Utc>,
}

/// Unit as exposed to API clients
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UnitInfo {
    /// `S{n}` for scenes, a UUID for fallback chunks
    pub id: String,
    /// 0-based position in the source
    pub index: i64,
    /// Scene header or `Chunk {n}`
    pub title: String,
    /// Current status
    pub status: UnitStatus,
    /// Failed attempts so far
    pub retries: i64,
    /// Last failure reason
    pub error_message: Option<String>,
    /// Analysis result for `done` units
    pub result: Option<serde_json::Value>,
}

/// Per-unit detail attached to a progress event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnitEvent {
    /// Unit id
    pub unit_id: String,
    /// Unit index
    pub unit_index: i64,
    /// Unit status after this step
    pub status: UnitStatus,
    /// Analysis result, when one was just produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error text or skip note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Live progress update fanned out to observers of one job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Job this event belongs to
    pub job_id: JobId,
    /// Job status at publish time
    pub status: JobStatus,
    /// Units processed so far
    pub processed_count: i64,
    /// Units in the job
    pub total_count: i64,
    /// Present for per-unit updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_event: Option<UnitEvent>,
    /// Human-readable note
    pub message: String,
    /// Publish time
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Job-level event without unit detail
    pub fn job(
        job_id: JobId,
        status: JobStatus,
        processed_count: i64,
        total_count: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            status,
            processed_count,
            total_count,
            unit_event: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attach unit detail
    pub fn with_unit(mut self, unit_event: UnitEvent) -> Self {
        self.unit_event = Some(unit_event);
        self
    }
}

/// Resume marker for one (job, stage) pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Job id
    pub job_id: JobId,
    /// Stage name (`scene_analysis`, `graph_generation`, ...)
    pub stage: String,
    /// Highest index such that every unit up to and including it is done
    pub last_processed_index: i64,
    /// Results of units `0..=last_processed_index`, in index order
    pub accumulated_results: Vec<serde_json::Value>,
    /// Last advance
    pub updated_at: DateTime<Utc>,
}
