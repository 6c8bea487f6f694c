use dirsync_core::{join_path, Department, LeadershipEdge, Profile, SourceError, StateSource};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Persisted rows of one category, keyed the way external records are matched.
///
/// Each map is loaded on first use and kept for the rest of the run. Nothing writes to
/// storage mid-run, so the cached view never goes stale.
pub struct ExistingState<'s, S: StateSource + ?Sized> {
    source: &'s S,
    category_id: i64,
    departments: Option<HashMap<String, Department>>,
    profiles: Option<HashMap<String, Profile>>,
}

impl<'s, S: StateSource + ?Sized> ExistingState<'s, S> {
    pub fn new(source: &'s S, category_id: i64) -> Self {
        Self {
            source,
            category_id,
            departments: None,
            profiles: None,
        }
    }

    pub fn departments(&mut self) -> Result<&HashMap<String, Department>, SourceError> {
        if self.departments.is_none() {
            let rows = self.source.fetch_departments(self.category_id)?;
            let loaded = rows.len();
            let index = index_departments_by_path(rows);
            info!(
                category_id = self.category_id,
                loaded,
                indexed = index.len(),
                "loaded existing departments"
            );
            self.departments = Some(index);
        }
        Ok(&*self.departments.get_or_insert_with(HashMap::new))
    }

    pub fn profiles(&mut self) -> Result<&HashMap<String, Profile>, SourceError> {
        if self.profiles.is_none() {
            let index = self
                .source
                .fetch_profiles(self.category_id)?
                .into_iter()
                .map(|profile| (profile.username.clone(), profile))
                .collect::<HashMap<_, _>>();
            info!(
                category_id = self.category_id,
                indexed = index.len(),
                "loaded existing profiles"
            );
            self.profiles = Some(index);
        }
        Ok(&*self.profiles.get_or_insert_with(HashMap::new))
    }

    pub fn department(&mut self, path: &str) -> Result<Option<&Department>, SourceError> {
        Ok(self.departments()?.get(path))
    }

    pub fn profile(&mut self, username: &str) -> Result<Option<&Profile>, SourceError> {
        Ok(self.profiles()?.get(username))
    }

    /// Persisted leadership edges starting or ending at any of `profile_ids`. Not cached.
    pub fn leadership_edges(
        &self,
        profile_ids: &[i64],
    ) -> Result<Vec<LeadershipEdge>, SourceError> {
        self.source.fetch_leadership_edges(profile_ids)
    }
}

/// Keys persisted departments by their root-to-leaf name path.
///
/// Rows whose parent chain loops back on itself are left out. A parent outside the
/// fetched set ends the chain. When two rows share a path the later row wins.
pub fn index_departments_by_path(rows: Vec<Department>) -> HashMap<String, Department> {
    let paths = {
        let by_id = rows
            .iter()
            .map(|dept| (dept.id, dept))
            .collect::<HashMap<_, _>>();
        rows.iter()
            .map(|dept| department_path(dept, &by_id))
            .collect::<Vec<_>>()
    };

    let mut index = HashMap::with_capacity(rows.len());
    for (dept, path) in rows.into_iter().zip(paths) {
        let Some(path) = path else {
            continue;
        };
        if let Some(previous) = index.insert(path.clone(), dept) {
            debug!(
                path = %path,
                shadowed_id = previous.id,
                "persisted departments share a path"
            );
        }
    }
    index
}

fn department_path<'a>(
    dept: &'a Department,
    by_id: &HashMap<i64, &'a Department>,
) -> Option<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(dept);
    while let Some(node) = cursor {
        if !seen.insert(node.id) {
            warn!(
                department_id = dept.id,
                "persisted department parent chain loops, leaving it out of the index"
            );
            return None;
        }
        names.push(node.name.as_str());
        cursor = node
            .parent_id
            .and_then(|parent_id| by_id.get(&parent_id).copied());
    }
    names.reverse();
    Some(join_path(names))
}
