mod state;

use crate::db::Database;
use crate::splitter::SplitUnit;
use crate::types::{JobId, JobStatus};
use tempfile::NamedTempFile;

use super::StatusUpdate;

/// Fresh database on a temp file; keep the file alive for the test's duration
async fn test_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn scene(index: usize) -> SplitUnit {
    SplitUnit {
        id: format!("S{}", index + 1),
        index,
        title: format!("INT. ROOM {} - DAY", index + 1),
        text: format!("INT. ROOM {} - DAY\nAction.\n", index + 1),
    }
}

/// Job with `count` units already chunked and sitting in `analyzing`
async fn job_with_units(db: &Database, count: usize) -> JobId {
    let job_id = db.insert_job("script.txt").await.unwrap();
    let units: Vec<SplitUnit> = (0..count).map(scene).collect();
    db.insert_units(job_id, &units).await.unwrap();
    db.set_total_units(job_id, count as i64).await.unwrap();
    for (from, to) in [
        (JobStatus::Created, JobStatus::Uploaded),
        (JobStatus::Uploaded, JobStatus::QueuedForChunking),
        (JobStatus::QueuedForChunking, JobStatus::Chunking),
        (JobStatus::Chunking, JobStatus::ChunkingComplete),
        (JobStatus::ChunkingComplete, JobStatus::QueuedForAnalysis),
        (JobStatus::QueuedForAnalysis, JobStatus::Analyzing),
    ] {
        assert!(
            db.compare_and_set_status(job_id, from, to, StatusUpdate::default())
                .await
                .unwrap()
        );
    }
    job_id
}
