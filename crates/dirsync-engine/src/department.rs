use crate::audit::AuditRecorder;
use crate::batch::WriteBackBatch;
use crate::state::ExistingState;
use dirsync_core::{
    join_path, Category, Department, EntityKind, ExternalDepartment, Extras, SourceError,
    StateSource, SyncConfig, SyncOperation, TreePlacement, PATH_SEPARATOR,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Extras key holding the configured directory class of a department.
pub const DEPARTMENT_TYPE_KEY: &str = "type";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("department <{dn}> has a parent cycle through <{via}>")]
    CycleDetected { dn: String, via: String },
    #[error("department <{dn}> references parent <{parent_dn}> which is not in this batch")]
    UnknownParent { dn: String, parent_dn: String },
    #[error("department <{dn}> is not in this batch")]
    UnknownDepartment { dn: String },
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Adjacency view over one batch of external departments, keyed by `dn`.
pub struct DepartmentTree<'a> {
    records: Vec<&'a ExternalDepartment>,
    by_dn: HashMap<&'a str, usize>,
}

impl<'a> DepartmentTree<'a> {
    pub fn build(departments: &'a [ExternalDepartment]) -> Self {
        let mut records = Vec::with_capacity(departments.len());
        let mut by_dn = HashMap::with_capacity(departments.len());
        for dept in departments {
            if by_dn.contains_key(dept.dn.as_str()) {
                warn!(dn = %dept.dn, "duplicate department dn in batch, keeping the first record");
                continue;
            }
            by_dn.insert(dept.dn.as_str(), records.len());
            records.push(dept);
        }
        Self { records, by_dn }
    }

    pub fn records(&self) -> &[&'a ExternalDepartment] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, dn: &str) -> Option<&'a ExternalDepartment> {
        self.by_dn.get(dn).map(|&index| self.records[index])
    }

    /// The record for `dn` preceded by all of its ancestors, root first.
    pub fn lineage(&self, dn: &str) -> Result<Vec<&'a ExternalDepartment>, ResolveError> {
        let mut record = self
            .get(dn)
            .ok_or_else(|| ResolveError::UnknownDepartment { dn: dn.to_string() })?;
        let mut lineage = vec![record];
        let mut visited = HashSet::from([record.dn.as_str()]);

        while let Some(parent_dn) = record
            .parent_dn
            .as_deref()
            .filter(|parent_dn| !parent_dn.is_empty())
        {
            let parent = self
                .get(parent_dn)
                .ok_or_else(|| ResolveError::UnknownParent {
                    dn: record.dn.clone(),
                    parent_dn: parent_dn.to_string(),
                })?;
            if !visited.insert(parent.dn.as_str()) {
                return Err(ResolveError::CycleDetected {
                    dn: dn.to_string(),
                    via: parent.dn.clone(),
                });
            }
            lineage.push(parent);
            record = parent;
        }

        lineage.reverse();
        Ok(lineage)
    }

    pub fn natural_key(&self, dn: &str) -> Result<String, ResolveError> {
        let lineage = self.lineage(dn)?;
        Ok(join_path(lineage.iter().map(|record| record.name.as_str())))
    }
}

/// Departments resolved in this run, keyed by natural key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedDepartments {
    by_path: BTreeMap<String, Department>,
}

impl ResolvedDepartments {
    pub fn get(&self, path: &str) -> Option<&Department> {
        self.by_path.get(path)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

pub struct DepartmentResolver<'r, 's, S: StateSource + ?Sized> {
    category: &'r Category,
    config: &'r SyncConfig,
    state: &'r mut ExistingState<'s, S>,
    batch: &'r mut WriteBackBatch,
    audit: &'r mut AuditRecorder,
}

impl<'r, 's, S: StateSource + ?Sized> DepartmentResolver<'r, 's, S> {
    pub fn new(
        category: &'r Category,
        config: &'r SyncConfig,
        state: &'r mut ExistingState<'s, S>,
        batch: &'r mut WriteBackBatch,
        audit: &'r mut AuditRecorder,
    ) -> Self {
        Self {
            category,
            config,
            state,
            batch,
            audit,
        }
    }

    /// Resolves every record of the tree. Broken records are audited and skipped; only a
    /// failing state source stops the phase.
    pub fn resolve_all(
        &mut self,
        tree: &DepartmentTree<'_>,
    ) -> Result<ResolvedDepartments, SourceError> {
        let mut paths = BTreeSet::new();
        let mut failed = 0usize;

        for record in tree.records() {
            match self.resolve(tree, &record.dn) {
                Ok((path, _)) => {
                    paths.insert(path);
                }
                Err(ResolveError::Source(err)) => return Err(err),
                Err(err) => {
                    warn!(dn = %record.dn, error = %err, "department skipped");
                    self.audit.department_failed(&record.dn, &err);
                    failed += 1;
                }
            }
        }

        let by_path = paths
            .into_iter()
            .filter_map(|path| {
                let dept = self.batch.get::<Department>(&path)?.clone();
                Some((path, dept))
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            category_id = self.category.id,
            records = tree.len(),
            resolved = by_path.len(),
            failed,
            "department phase resolved"
        );
        Ok(ResolvedDepartments { by_path })
    }

    /// Resolves `dn` and its ancestors, ancestors first, and returns its natural key
    /// together with the staged department.
    pub fn resolve(
        &mut self,
        tree: &DepartmentTree<'_>,
        dn: &str,
    ) -> Result<(String, Department), ResolveError> {
        let lineage = tree.lineage(dn)?;
        let mut parent: Option<(String, i64)> = None;

        for record in lineage {
            let path = match &parent {
                Some((parent_path, _)) => format!("{parent_path}{PATH_SEPARATOR}{}", record.name),
                None => record.name.clone(),
            };
            let parent_id = parent.as_ref().map(|(_, id)| *id);
            let dept = self.stage(record, &path, parent_id)?;
            if record.dn == dn {
                return Ok((path, dept));
            }
            parent = Some((path, dept.id));
        }

        Err(ResolveError::UnknownDepartment { dn: dn.to_string() })
    }

    fn stage(
        &mut self,
        record: &ExternalDepartment,
        path: &str,
        parent_id: Option<i64>,
    ) -> Result<Department, ResolveError> {
        if let Some(staged) = self.batch.get_mut::<Department>(path) {
            if let Some(code) = record.assigned_code() {
                if staged.code != code {
                    debug!(path, from = %staged.code, to = code, "patching staged department code");
                    staged.code = code.to_string();
                }
            }
            return Ok(staged.clone());
        }

        let mut extras = Extras::new();
        extras.insert(
            DEPARTMENT_TYPE_KEY.to_string(),
            Value::String(self.config.department_type(record.is_group).to_string()),
        );

        let existing = self.state.department(path)?.cloned();
        let (dept, operation) = match existing {
            Some(mut dept) => {
                dept.code = pick_code(record, &dept.code, path);
                dept.category_id = self.category.id;
                dept.name = record.name.clone();
                dept.enabled = true;
                dept.parent_id = parent_id;
                dept.placement = TreePlacement::default();
                dept.extras = extras;
                (dept, SyncOperation::Update)
            }
            None => {
                let dept = Department {
                    id: self.batch.allocate_id(EntityKind::Department),
                    category_id: self.category.id,
                    name: record.name.clone(),
                    code: pick_code(record, "", path),
                    parent_id,
                    enabled: true,
                    placement: TreePlacement::default(),
                    extras,
                };
                (dept, SyncOperation::Insert)
            }
        };

        self.batch.stage(path, dept.clone(), operation);
        self.audit.department_synced(path);
        Ok(dept)
    }
}

/// External code when it carries one, else whatever code the row already has, else the
/// natural key itself.
fn pick_code(record: &ExternalDepartment, current: &str, path: &str) -> String {
    record
        .assigned_code()
        .or_else(|| Some(current.trim()).filter(|code| !code.is_empty()))
        .unwrap_or(path)
        .to_string()
}
