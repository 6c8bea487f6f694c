pub mod audit;
pub mod batch;
pub mod department;
pub mod profile;
pub mod state;

pub use audit::AuditRecorder;
pub use batch::{Stageable, StagedSet, WriteBackBatch};
pub use department::{DepartmentResolver, DepartmentTree, ResolveError, ResolvedDepartments};
pub use profile::{LeadershipOutcome, ProfileReconciler};
pub use state::ExistingState;

use dirsync_core::{
    Category, ConfigError, EntityKind, ExternalDepartment, ExternalProfile, RunAuditLog,
    SourceError, StagedWrites, StateSource, SyncConfig, SyncOperation, UsernameRule,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state source error: {0}")]
    Source(#[from] SourceError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentSync {
    pub audit: RunAuditLog,
    pub resolved: ResolvedDepartments,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub departments_inserted: usize,
    pub departments_updated: usize,
    pub profiles_inserted: usize,
    pub profiles_updated: usize,
    pub memberships: usize,
    pub leadership_edges: usize,
    pub leadership_edges_dropped: usize,
    pub failures: usize,
}

/// One synchronization pass over a category.
///
/// Owns the existing-state index and the write-back batch for the pass. Departments
/// must be synced before profiles so memberships can see the resolved tree; nothing is
/// written until the caller flushes the result of [`SyncRun::finish`].
pub struct SyncRun<'s, S: StateSource + ?Sized> {
    config: SyncConfig,
    category: Category,
    state: ExistingState<'s, S>,
    batch: WriteBackBatch,
    touched: BTreeSet<i64>,
    leadership: LeadershipOutcome,
    failures: usize,
}

impl<'s, S: StateSource + ?Sized> SyncRun<'s, S> {
    pub fn begin(config: SyncConfig, source: &'s S) -> Result<Self, EngineError> {
        config.validate()?;
        let category = config.category();
        let watermarks = source.id_watermarks()?;
        info!(
            category_id = category.id,
            department_watermark = watermarks.department,
            profile_watermark = watermarks.profile,
            "sync run started"
        );

        Ok(Self {
            state: ExistingState::new(source, category.id),
            batch: WriteBackBatch::new(category.id, watermarks),
            config,
            category,
            touched: BTreeSet::new(),
            leadership: LeadershipOutcome::default(),
            failures: 0,
        })
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn batch(&self) -> &WriteBackBatch {
        &self.batch
    }

    pub fn sync_departments(
        &mut self,
        departments: &[ExternalDepartment],
    ) -> Result<DepartmentSync, EngineError> {
        let tree = DepartmentTree::build(departments);
        let mut audit = AuditRecorder::default();
        let resolved = DepartmentResolver::new(
            &self.category,
            &self.config,
            &mut self.state,
            &mut self.batch,
            &mut audit,
        )
        .resolve_all(&tree)?;

        let audit = audit.finish();
        self.failures += audit.failures().count();
        Ok(DepartmentSync { audit, resolved })
    }

    pub fn sync_profiles(
        &mut self,
        profiles: &[ExternalProfile],
        resolved: &ResolvedDepartments,
        rule: &dyn UsernameRule,
    ) -> Result<RunAuditLog, EngineError> {
        let mut audit = AuditRecorder::default();
        self.leadership = ProfileReconciler::new(
            &self.category,
            rule,
            &mut self.state,
            &mut self.batch,
            &mut audit,
            &mut self.touched,
        )
        .reconcile(profiles, resolved)?;

        let audit = audit.finish();
        self.failures += audit.failures().count();
        Ok(audit)
    }

    pub fn summary(&self) -> RunSummary {
        let departments = self.batch.departments();
        let profiles = self.batch.profiles();
        RunSummary {
            departments_inserted: departments.count(SyncOperation::Insert),
            departments_updated: departments.count(SyncOperation::Update),
            profiles_inserted: profiles.count(SyncOperation::Insert),
            profiles_updated: profiles.count(SyncOperation::Update),
            memberships: self.batch.memberships().count(),
            leadership_edges: self.batch.leadership_edges().count(),
            leadership_edges_dropped: self.leadership.dropped,
            failures: self.failures,
        }
    }

    pub fn finish(self) -> (StagedWrites, RunSummary) {
        let summary = self.summary();
        let writes = self.batch.into_writes();
        info!(
            category_id = writes.category_id,
            departments = writes.departments.len(),
            profiles = writes.profiles.len(),
            new_departments = writes.count(EntityKind::Department, SyncOperation::Insert),
            new_profiles = writes.count(EntityKind::Profile, SyncOperation::Insert),
            failures = summary.failures,
            "sync run staged"
        );
        (writes, summary)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub departments: RunAuditLog,
    pub profiles: RunAuditLog,
    pub writes: StagedWrites,
    pub summary: RunSummary,
}

/// Runs both phases with the username rule from `config`. The caller flushes `writes`.
pub fn sync_directory<S: StateSource + ?Sized>(
    config: SyncConfig,
    source: &S,
    departments: &[ExternalDepartment],
    profiles: &[ExternalProfile],
) -> Result<SyncOutcome, EngineError> {
    let rule = config.username_rule()?;
    let mut run = SyncRun::begin(config, source)?;
    let department_sync = run.sync_departments(departments)?;
    let profile_audit = run.sync_profiles(profiles, &department_sync.resolved, &rule)?;
    let (writes, summary) = run.finish();

    Ok(SyncOutcome {
        departments: department_sync.audit,
        profiles: profile_audit,
        writes,
        summary,
    })
}
