//! Run-scoped write-back batch.
//!
//! Nothing here touches storage. Entities are staged under their natural key so a
//! department reached both directly and as someone's ancestor is staged once, and the
//! whole batch is handed to the flush sink after both resolvers finish.

use dirsync_core::{
    Department, DepartmentMembership, EntityKind, IdWatermarks, LeadershipEdge, Profile,
    StagedRow, StagedWrites, SyncOperation,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// An entity kind the batch can stage under a natural key.
pub trait Stageable: Clone {
    const KIND: EntityKind;

    fn id(&self) -> i64;

    fn staged(batch: &WriteBackBatch) -> &StagedSet<Self>;

    fn staged_mut(batch: &mut WriteBackBatch) -> &mut StagedSet<Self>;
}

impl Stageable for Department {
    const KIND: EntityKind = EntityKind::Department;

    fn id(&self) -> i64 {
        self.id
    }

    fn staged(batch: &WriteBackBatch) -> &StagedSet<Self> {
        &batch.departments
    }

    fn staged_mut(batch: &mut WriteBackBatch) -> &mut StagedSet<Self> {
        &mut batch.departments
    }
}

impl Stageable for Profile {
    const KIND: EntityKind = EntityKind::Profile;

    fn id(&self) -> i64 {
        self.id
    }

    fn staged(batch: &WriteBackBatch) -> &StagedSet<Self> {
        &batch.profiles
    }

    fn staged_mut(batch: &mut WriteBackBatch) -> &mut StagedSet<Self> {
        &mut batch.profiles
    }
}

/// Staged rows of one kind, in staging order, indexed by natural key.
#[derive(Debug, Clone)]
pub struct StagedSet<T> {
    rows: Vec<StagedRow<T>>,
    by_key: HashMap<String, usize>,
}

impl<T> Default for StagedSet<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<T> StagedSet<T> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[StagedRow<T>] {
        &self.rows
    }

    pub fn count(&self, operation: SyncOperation) -> usize {
        self.rows
            .iter()
            .filter(|row| row.operation == operation)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct WriteBackBatch {
    category_id: i64,
    last_ids: BTreeMap<EntityKind, i64>,
    departments: StagedSet<Department>,
    profiles: StagedSet<Profile>,
    memberships: BTreeSet<DepartmentMembership>,
    leadership_edges: BTreeSet<LeadershipEdge>,
    relation_scope: BTreeSet<i64>,
}

impl WriteBackBatch {
    pub fn new(category_id: i64, watermarks: IdWatermarks) -> Self {
        let last_ids = [EntityKind::Department, EntityKind::Profile]
            .into_iter()
            .map(|kind| (kind, watermarks.for_kind(kind).max(0)))
            .collect();
        Self {
            category_id,
            last_ids,
            departments: StagedSet::default(),
            profiles: StagedSet::default(),
            memberships: BTreeSet::new(),
            leadership_edges: BTreeSet::new(),
            relation_scope: BTreeSet::new(),
        }
    }

    pub fn category_id(&self) -> i64 {
        self.category_id
    }

    /// Hands out the next surrogate id for `kind`. Ids are never reused within a run.
    pub fn allocate_id(&mut self, kind: EntityKind) -> i64 {
        let last = self.last_ids.entry(kind).or_insert(0);
        *last += 1;
        *last
    }

    /// Records `entity` under `key`. Returns `false` when the key was already staged; the
    /// entity then replaces the staged one but keeps its first operation, so an
    /// insert revisited later in the run still flushes as an insert.
    pub fn stage<T: Stageable>(
        &mut self,
        key: impl Into<String>,
        entity: T,
        operation: SyncOperation,
    ) -> bool {
        let key = key.into();
        let set = T::staged_mut(self);
        if let Some(&index) = set.by_key.get(&key) {
            debug!(
                kind = T::KIND.as_str(),
                key = %key,
                id = entity.id(),
                "restaging entity already in batch"
            );
            set.rows[index].entity = entity;
            return false;
        }

        debug!(
            kind = T::KIND.as_str(),
            key = %key,
            id = entity.id(),
            operation = operation.as_str(),
            "staging entity"
        );
        set.by_key.insert(key, set.rows.len());
        set.rows.push(StagedRow { operation, entity });
        true
    }

    pub fn exists<T: Stageable>(&self, key: &str) -> bool {
        T::staged(self).by_key.contains_key(key)
    }

    pub fn get<T: Stageable>(&self, key: &str) -> Option<&T> {
        let set = T::staged(self);
        set.by_key.get(key).map(|&index| &set.rows[index].entity)
    }

    pub fn get_mut<T: Stageable>(&mut self, key: &str) -> Option<&mut T> {
        let set = T::staged_mut(self);
        let index = *set.by_key.get(key)?;
        Some(&mut set.rows[index].entity)
    }

    pub fn operation_of<T: Stageable>(&self, key: &str) -> Option<SyncOperation> {
        let set = T::staged(self);
        set.by_key.get(key).map(|&index| set.rows[index].operation)
    }

    pub fn departments(&self) -> &StagedSet<Department> {
        &self.departments
    }

    pub fn profiles(&self) -> &StagedSet<Profile> {
        &self.profiles
    }

    pub fn stage_membership(&mut self, membership: DepartmentMembership) -> bool {
        self.memberships.insert(membership)
    }

    pub fn stage_leadership_edge(&mut self, edge: LeadershipEdge) -> bool {
        self.leadership_edges.insert(edge)
    }

    pub fn memberships(&self) -> impl Iterator<Item = &DepartmentMembership> {
        self.memberships.iter()
    }

    pub fn leadership_edges(&self) -> impl Iterator<Item = &LeadershipEdge> {
        self.leadership_edges.iter()
    }

    /// Marks a profile whose relationships this run re-derives from scratch.
    pub fn scope_relations(&mut self, profile_id: i64) {
        self.relation_scope.insert(profile_id);
    }

    pub fn into_writes(self) -> StagedWrites {
        StagedWrites {
            category_id: self.category_id,
            departments: self.departments.rows,
            profiles: self.profiles.rows,
            memberships: self.memberships.into_iter().collect(),
            leadership_edges: self.leadership_edges.into_iter().collect(),
            relation_scope: self.relation_scope.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_core::{Extras, TreePlacement};

    fn department(id: i64, name: &str) -> Department {
        Department {
            id,
            category_id: 1,
            name: name.to_string(),
            code: name.to_string(),
            parent_id: None,
            enabled: true,
            placement: TreePlacement::default(),
            extras: Extras::new(),
        }
    }

    #[test]
    fn allocator_starts_above_persisted_watermarks() {
        let mut batch = WriteBackBatch::new(
            1,
            IdWatermarks {
                department: 40,
                profile: 7,
            },
        );
        assert_eq!(batch.allocate_id(EntityKind::Department), 41);
        assert_eq!(batch.allocate_id(EntityKind::Department), 42);
        assert_eq!(batch.allocate_id(EntityKind::Profile), 8);
    }

    #[test]
    fn restaging_a_key_keeps_first_operation_and_position() {
        let mut batch = WriteBackBatch::new(1, IdWatermarks::default());
        assert!(batch.stage("Org", department(1, "Org"), SyncOperation::Insert));
        assert!(batch.stage("Org/Team", department(2, "Team"), SyncOperation::Update));

        let mut patched = department(1, "Org");
        patched.code = "ORG-1".to_string();
        assert!(!batch.stage("Org", patched, SyncOperation::Update));

        assert_eq!(
            batch.operation_of::<Department>("Org"),
            Some(SyncOperation::Insert)
        );
        let writes = batch.into_writes();
        assert_eq!(writes.departments.len(), 2);
        assert_eq!(writes.departments[0].entity.code, "ORG-1");
        assert_eq!(writes.departments[1].entity.name, "Team");
    }

    #[test]
    fn lookups_are_scoped_by_entity_kind() {
        let mut batch = WriteBackBatch::new(1, IdWatermarks::default());
        batch.stage("alice", department(1, "alice"), SyncOperation::Insert);

        assert!(batch.exists::<Department>("alice"));
        assert!(!batch.exists::<Profile>("alice"));
        assert!(batch.get::<Profile>("alice").is_none());

        batch
            .get_mut::<Department>("alice")
            .expect("staged")
            .enabled = false;
        assert!(!batch.get::<Department>("alice").expect("staged").enabled);
    }

    #[test]
    fn relations_are_deduplicated() {
        let mut batch = WriteBackBatch::new(1, IdWatermarks::default());
        let membership = DepartmentMembership {
            profile_id: 3,
            department_id: 1,
        };
        assert!(batch.stage_membership(membership));
        assert!(!batch.stage_membership(membership));
        batch.scope_relations(3);
        batch.scope_relations(3);

        let writes = batch.into_writes();
        assert_eq!(writes.memberships, vec![membership]);
        assert_eq!(writes.relation_scope, vec![3]);
    }
}
