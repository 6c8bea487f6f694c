use crate::model::{Department, IdWatermarks, LeadershipEdge, Profile};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("backing store failure: {0}")]
    Backend(String),
    #[error("corrupt persisted row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Read-only view of persisted directory state. Queried at most once per run per method.
pub trait StateSource {
    fn fetch_departments(&self, category_id: i64) -> Result<Vec<Department>, SourceError>;

    fn fetch_profiles(&self, category_id: i64) -> Result<Vec<Profile>, SourceError>;

    /// Edges with either endpoint among `profile_ids`.
    fn fetch_leadership_edges(
        &self,
        profile_ids: &[i64],
    ) -> Result<Vec<LeadershipEdge>, SourceError>;

    fn id_watermarks(&self) -> Result<IdWatermarks, SourceError>;
}
