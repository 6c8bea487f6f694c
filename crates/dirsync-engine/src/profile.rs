use crate::audit::{AuditRecorder, DEPARTMENT_NOT_FOUND};
use crate::batch::WriteBackBatch;
use crate::department::ResolvedDepartments;
use crate::state::ExistingState;
use dirsync_core::{
    join_path, Category, DepartmentMembership, EntityKind, ExternalProfile, Profile,
    ProfileStatus, SourceError, StateSource, SyncOperation, UsernameRule,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// What the leadership pass did with the persisted edges it looked at.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipOutcome {
    pub restaged: usize,
    pub dropped: usize,
}

pub struct ProfileReconciler<'r, 's, S: StateSource + ?Sized> {
    category: &'r Category,
    rule: &'r dyn UsernameRule,
    state: &'r mut ExistingState<'s, S>,
    batch: &'r mut WriteBackBatch,
    audit: &'r mut AuditRecorder,
    touched: &'r mut BTreeSet<i64>,
}

impl<'r, 's, S: StateSource + ?Sized> ProfileReconciler<'r, 's, S> {
    pub fn new(
        category: &'r Category,
        rule: &'r dyn UsernameRule,
        state: &'r mut ExistingState<'s, S>,
        batch: &'r mut WriteBackBatch,
        audit: &'r mut AuditRecorder,
        touched: &'r mut BTreeSet<i64>,
    ) -> Self {
        Self {
            category,
            rule,
            state,
            batch,
            audit,
            touched,
        }
    }

    /// Stages every valid profile with its memberships, then re-derives leadership among
    /// the profiles touched so far in this run.
    pub fn reconcile(
        &mut self,
        profiles: &[ExternalProfile],
        resolved: &ResolvedDepartments,
    ) -> Result<LeadershipOutcome, SourceError> {
        let mut skipped = 0usize;
        for info in profiles {
            if let Err(err) = self.rule.validate(&info.username) {
                warn!(username = %info.username, error = %err, "username does not meet format, skipping");
                self.audit.user_failed(&info.username, &err);
                skipped += 1;
                continue;
            }

            let profile = self.stage_profile(info)?;
            self.touched.insert(profile.id);
            self.batch.scope_relations(profile.id);

            for chain in &info.departments {
                let path = join_path(chain);
                let Some(department) = resolved.get(&path) else {
                    warn!(
                        username = %info.username,
                        department = %path,
                        "department of profile is missing, skipping membership"
                    );
                    self.audit
                        .membership_failed(&info.username, &path, DEPARTMENT_NOT_FOUND);
                    continue;
                };

                self.batch.stage_membership(DepartmentMembership {
                    profile_id: profile.id,
                    department_id: department.id,
                });
                self.audit.membership_synced(&info.username, &path);
            }

            self.audit.user_synced(&info.username);
        }

        info!(
            category_id = self.category.id,
            profiles = profiles.len(),
            skipped,
            touched = self.touched.len(),
            "profile phase staged"
        );

        self.rederive_leadership()
    }

    fn stage_profile(&mut self, info: &ExternalProfile) -> Result<Profile, SourceError> {
        if let Some(mut profile) = self.state.profile(&info.username)?.cloned() {
            self.apply_fields(&mut profile, info);
            self.batch
                .stage(info.username.as_str(), profile.clone(), SyncOperation::Update);
            return Ok(profile);
        }

        if let Some(staged) = self.batch.get::<Profile>(&info.username) {
            debug!(
                username = %info.username,
                id = staged.id,
                "profile already staged in this run, reusing it"
            );
            return Ok(staged.clone());
        }

        let mut profile = Profile {
            id: self.batch.allocate_id(EntityKind::Profile),
            category_id: self.category.id,
            domain: String::new(),
            username: String::new(),
            display_name: String::new(),
            email: String::new(),
            telephone: String::new(),
            code: String::new(),
            status: ProfileStatus::Normal,
            enabled: true,
            extras: Default::default(),
        };
        self.apply_fields(&mut profile, info);
        self.batch
            .stage(info.username.as_str(), profile.clone(), SyncOperation::Insert);
        Ok(profile)
    }

    fn apply_fields(&self, profile: &mut Profile, info: &ExternalProfile) {
        profile.category_id = self.category.id;
        profile.domain = self.category.domain.clone();
        profile.enabled = true;
        profile.username = info.username.clone();
        profile.display_name = info.display_name.clone();
        profile.email = info.email.clone();
        profile.code = info.code.clone();
        profile.telephone = info.telephone.clone();
        profile.status = ProfileStatus::Normal;
        profile.extras = info.extras.clone();
    }

    /// Re-stages persisted leadership edges whose endpoints were both touched in this run.
    /// Edges with one end outside the run, in either direction, are dropped.
    fn rederive_leadership(&mut self) -> Result<LeadershipOutcome, SourceError> {
        let touched_ids = self.touched.iter().copied().collect::<Vec<_>>();
        let edges = self.state.leadership_edges(&touched_ids)?;
        let mut outcome = LeadershipOutcome::default();

        for edge in edges {
            if !self.touched.contains(&edge.from_profile_id)
                || !self.touched.contains(&edge.to_profile_id)
            {
                debug!(
                    from = edge.from_profile_id,
                    to = edge.to_profile_id,
                    "leadership edge leaves this run, dropping it"
                );
                outcome.dropped += 1;
                continue;
            }
            self.batch.stage_leadership_edge(edge);
            outcome.restaged += 1;
        }

        info!(
            restaged = outcome.restaged,
            dropped = outcome.dropped,
            "leadership edges re-derived"
        );
        Ok(outcome)
    }
}
