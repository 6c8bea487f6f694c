use chrono::{DateTime, Utc};
use dirsync_core::{
    Department, DepartmentMembership, Extras, IdWatermarks, LeadershipEdge, Profile,
    ProfileStatus, SourceError, StagedWrites, StateSource, SyncOperation, TreePlacement,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

pub const DIRECTORY_SCHEMA_VERSION: i64 = 1;

const DEPARTMENT_COLUMNS: &str =
    "id, category_id, name, code, parent_id, enabled, tree_id, lft, rght, level, extras_json";
const PROFILE_COLUMNS: &str = "id, category_id, domain, username, display_name, email, telephone, code, status, enabled, extras_json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("staged update for missing {table} row {id}")]
    MissingRow { table: &'static str, id: i64 },
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

impl From<StorageError> for SourceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CorruptRow { table, reason } => SourceError::CorruptRow { table, reason },
            other => SourceError::Backend(other.to_string()),
        }
    }
}

/// Row counts applied by one [`DirectoryStore::commit`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub departments_inserted: usize,
    pub departments_updated: usize,
    pub profiles_inserted: usize,
    pub profiles_updated: usize,
    pub memberships_written: usize,
    pub memberships_removed: usize,
    pub leadership_edges_written: usize,
    pub leadership_edges_removed: usize,
}

pub struct DirectoryStore {
    conn: Connection,
}

impl DirectoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > DIRECTORY_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: DIRECTORY_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_directory_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    /// Inserts or replaces a department row outside of a sync run.
    pub fn upsert_department(&self, department: &Department) -> Result<(), StorageError> {
        let extras_json = extras_to_json(&department.extras)?;
        self.conn.execute(
            "
            INSERT OR REPLACE INTO departments (
                id, category_id, name, code, parent_id, enabled,
                tree_id, lft, rght, level, extras_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            params![
                department.id,
                department.category_id,
                department.name,
                department.code,
                department.parent_id,
                department.enabled,
                department.placement.tree_id,
                department.placement.lft,
                department.placement.rght,
                department.placement.level,
                extras_json,
            ],
        )?;
        Ok(())
    }

    /// Inserts or replaces a profile row outside of a sync run.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<(), StorageError> {
        let extras_json = extras_to_json(&profile.extras)?;
        self.conn.execute(
            "
            INSERT OR REPLACE INTO profiles (
                id, category_id, domain, username, display_name, email,
                telephone, code, status, enabled, extras_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            params![
                profile.id,
                profile.category_id,
                profile.domain,
                profile.username,
                profile.display_name,
                profile.email,
                profile.telephone,
                profile.code,
                profile.status.as_str(),
                profile.enabled,
                extras_json,
            ],
        )?;
        Ok(())
    }

    pub fn insert_leadership_edge(&self, edge: &LeadershipEdge) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "INSERT OR IGNORE INTO leadership_edges (from_profile_id, to_profile_id) VALUES (?1, ?2)",
            params![edge.from_profile_id, edge.to_profile_id],
        )?;
        Ok(changes > 0)
    }

    pub fn departments_for_category(
        &self,
        category_id: i64,
    ) -> Result<Vec<Department>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE category_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([category_id], department_from_row)?;
        let mut departments = Vec::new();
        for row in rows {
            departments.push(decode_row("departments", row)?);
        }
        Ok(departments)
    }

    pub fn profiles_for_category(&self, category_id: i64) -> Result<Vec<Profile>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE category_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([category_id], profile_from_row)?;
        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(decode_row("profiles", row)?);
        }
        Ok(profiles)
    }

    pub fn profile_by_username(
        &self,
        category_id: i64,
        username: &str,
    ) -> Result<Option<Profile>, StorageError> {
        let profile = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles WHERE category_id = ?1 AND username = ?2"
                ),
                params![category_id, username],
                profile_from_row,
            )
            .optional();
        decode_row("profiles", profile)
    }

    /// Edges with either endpoint among `profile_ids`.
    pub fn leadership_edges_touching(
        &self,
        profile_ids: &[i64],
    ) -> Result<Vec<LeadershipEdge>, StorageError> {
        if profile_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; profile_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT from_profile_id, to_profile_id
            FROM leadership_edges
            WHERE from_profile_id IN ({placeholders}) OR to_profile_id IN ({placeholders})
            ORDER BY from_profile_id ASC, to_profile_id ASC
            "
        ))?;
        let ids = profile_ids.iter().chain(profile_ids.iter());
        let rows = stmt.query_map(params_from_iter(ids), |row| {
            Ok(LeadershipEdge {
                from_profile_id: row.get(0)?,
                to_profile_id: row.get(1)?,
            })
        })?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    pub fn leadership_edges_from(
        &self,
        from_profile_ids: &[i64],
    ) -> Result<Vec<LeadershipEdge>, StorageError> {
        if from_profile_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; from_profile_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT from_profile_id, to_profile_id
            FROM leadership_edges
            WHERE from_profile_id IN ({placeholders})
            ORDER BY from_profile_id ASC, to_profile_id ASC
            "
        ))?;
        let rows = stmt.query_map(params_from_iter(from_profile_ids.iter()), |row| {
            Ok(LeadershipEdge {
                from_profile_id: row.get(0)?,
                to_profile_id: row.get(1)?,
            })
        })?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    pub fn memberships_for_profile(
        &self,
        profile_id: i64,
    ) -> Result<Vec<DepartmentMembership>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT profile_id, department_id
            FROM department_memberships
            WHERE profile_id = ?1
            ORDER BY department_id ASC
            ",
        )?;
        let rows = stmt.query_map([profile_id], |row| {
            Ok(DepartmentMembership {
                profile_id: row.get(0)?,
                department_id: row.get(1)?,
            })
        })?;
        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row?);
        }
        Ok(memberships)
    }

    pub fn max_ids(&self) -> Result<IdWatermarks, StorageError> {
        let department =
            self.conn
                .query_row("SELECT COALESCE(MAX(id), 0) FROM departments", [], |row| {
                    row.get(0)
                })?;
        let profile = self
            .conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM profiles", [], |row| {
                row.get(0)
            })?;
        Ok(IdWatermarks {
            department,
            profile,
        })
    }

    /// Most recent commit timestamp touching this category, if any.
    pub fn last_synced_at(&self, category_id: i64) -> Result<Option<DateTime<Utc>>, StorageError> {
        let latest: Option<String> = self.conn.query_row(
            "
            SELECT MAX(updated_at) FROM (
                SELECT updated_at FROM departments WHERE category_id = ?1
                UNION ALL
                SELECT updated_at FROM profiles WHERE category_id = ?1
            )
            ",
            [category_id],
            |row| row.get(0),
        )?;
        latest.map(parse_timestamp).transpose()
    }

    /// Applies one run's staged writes atomically.
    ///
    /// Memberships and leadership edges (either endpoint) of every profile in
    /// `relation_scope` are replaced by the staged ones. Relations not touching the
    /// scope are left untouched.
    pub fn commit(
        &mut self,
        writes: &StagedWrites,
        committed_at: DateTime<Utc>,
    ) -> Result<CommitReport, StorageError> {
        let committed_at = committed_at.to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut report = CommitReport::default();

        for row in &writes.departments {
            let department = &row.entity;
            let extras_json = extras_to_json(&department.extras)?;
            match row.operation {
                SyncOperation::Insert => {
                    tx.execute(
                        "
                        INSERT INTO departments (
                            id, category_id, name, code, parent_id, enabled,
                            tree_id, lft, rght, level, extras_json, updated_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                        ",
                        params![
                            department.id,
                            department.category_id,
                            department.name,
                            department.code,
                            department.parent_id,
                            department.enabled,
                            department.placement.tree_id,
                            department.placement.lft,
                            department.placement.rght,
                            department.placement.level,
                            extras_json,
                            committed_at,
                        ],
                    )?;
                    report.departments_inserted += 1;
                }
                SyncOperation::Update => {
                    let changes = tx.execute(
                        "
                        UPDATE departments SET
                            category_id = ?2,
                            name = ?3,
                            code = ?4,
                            parent_id = ?5,
                            enabled = ?6,
                            tree_id = ?7,
                            lft = ?8,
                            rght = ?9,
                            level = ?10,
                            extras_json = ?11,
                            updated_at = ?12
                        WHERE id = ?1
                        ",
                        params![
                            department.id,
                            department.category_id,
                            department.name,
                            department.code,
                            department.parent_id,
                            department.enabled,
                            department.placement.tree_id,
                            department.placement.lft,
                            department.placement.rght,
                            department.placement.level,
                            extras_json,
                            committed_at,
                        ],
                    )?;
                    if changes == 0 {
                        return Err(StorageError::MissingRow {
                            table: "departments",
                            id: department.id,
                        });
                    }
                    report.departments_updated += 1;
                }
            }
        }

        for row in &writes.profiles {
            let profile = &row.entity;
            let extras_json = extras_to_json(&profile.extras)?;
            match row.operation {
                SyncOperation::Insert => {
                    tx.execute(
                        "
                        INSERT INTO profiles (
                            id, category_id, domain, username, display_name, email,
                            telephone, code, status, enabled, extras_json, updated_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                        ",
                        params![
                            profile.id,
                            profile.category_id,
                            profile.domain,
                            profile.username,
                            profile.display_name,
                            profile.email,
                            profile.telephone,
                            profile.code,
                            profile.status.as_str(),
                            profile.enabled,
                            extras_json,
                            committed_at,
                        ],
                    )?;
                    report.profiles_inserted += 1;
                }
                SyncOperation::Update => {
                    let changes = tx.execute(
                        "
                        UPDATE profiles SET
                            category_id = ?2,
                            domain = ?3,
                            username = ?4,
                            display_name = ?5,
                            email = ?6,
                            telephone = ?7,
                            code = ?8,
                            status = ?9,
                            enabled = ?10,
                            extras_json = ?11,
                            updated_at = ?12
                        WHERE id = ?1
                        ",
                        params![
                            profile.id,
                            profile.category_id,
                            profile.domain,
                            profile.username,
                            profile.display_name,
                            profile.email,
                            profile.telephone,
                            profile.code,
                            profile.status.as_str(),
                            profile.enabled,
                            extras_json,
                            committed_at,
                        ],
                    )?;
                    if changes == 0 {
                        return Err(StorageError::MissingRow {
                            table: "profiles",
                            id: profile.id,
                        });
                    }
                    report.profiles_updated += 1;
                }
            }
        }

        for profile_id in &writes.relation_scope {
            report.memberships_removed += tx.execute(
                "DELETE FROM department_memberships WHERE profile_id = ?1",
                [profile_id],
            )?;
            report.leadership_edges_removed += tx.execute(
                "DELETE FROM leadership_edges WHERE from_profile_id = ?1 OR to_profile_id = ?1",
                [profile_id],
            )?;
        }

        for membership in &writes.memberships {
            report.memberships_written += tx.execute(
                "INSERT OR IGNORE INTO department_memberships (profile_id, department_id) VALUES (?1, ?2)",
                params![membership.profile_id, membership.department_id],
            )?;
        }

        for edge in &writes.leadership_edges {
            report.leadership_edges_written += tx.execute(
                "INSERT OR IGNORE INTO leadership_edges (from_profile_id, to_profile_id) VALUES (?1, ?2)",
                params![edge.from_profile_id, edge.to_profile_id],
            )?;
        }

        tx.commit()?;
        Ok(report)
    }
}

impl StateSource for DirectoryStore {
    fn fetch_departments(&self, category_id: i64) -> Result<Vec<Department>, SourceError> {
        Ok(self.departments_for_category(category_id)?)
    }

    fn fetch_profiles(&self, category_id: i64) -> Result<Vec<Profile>, SourceError> {
        Ok(self.profiles_for_category(category_id)?)
    }

    fn fetch_leadership_edges(
        &self,
        profile_ids: &[i64],
    ) -> Result<Vec<LeadershipEdge>, SourceError> {
        Ok(self.leadership_edges_touching(profile_ids)?)
    }

    fn id_watermarks(&self) -> Result<IdWatermarks, SourceError> {
        Ok(self.max_ids()?)
    }
}

fn department_from_row(row: &Row<'_>) -> rusqlite::Result<Department> {
    let extras_json: String = row.get(10)?;
    Ok(Department {
        id: row.get(0)?,
        category_id: row.get(1)?,
        name: row.get(2)?,
        code: row.get(3)?,
        parent_id: row.get(4)?,
        enabled: row.get(5)?,
        placement: TreePlacement {
            tree_id: row.get(6)?,
            lft: row.get(7)?,
            rght: row.get(8)?,
            level: row.get(9)?,
        },
        extras: extras_from_json(10, &extras_json)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let status: String = row.get(8)?;
    let status = status.parse::<ProfileStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            Box::new(StorageError::Serialization(err)),
        )
    })?;
    let extras_json: String = row.get(10)?;

    Ok(Profile {
        id: row.get(0)?,
        category_id: row.get(1)?,
        domain: row.get(2)?,
        username: row.get(3)?,
        display_name: row.get(4)?,
        email: row.get(5)?,
        telephone: row.get(6)?,
        code: row.get(7)?,
        status,
        enabled: row.get(9)?,
        extras: extras_from_json(10, &extras_json)?,
    })
}

/// Separates rows that fail to decode from other SQLite failures.
fn decode_row<T>(table: &'static str, row: rusqlite::Result<T>) -> Result<T, StorageError> {
    row.map_err(|err| {
        if matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..)
        ) {
            StorageError::CorruptRow {
                table,
                reason: err.to_string(),
            }
        } else {
            StorageError::Sqlite(err)
        }
    })
}

fn extras_to_json(extras: &Extras) -> Result<String, StorageError> {
    serde_json::to_string(extras).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn extras_from_json(column: usize, value: &str) -> rusqlite::Result<Extras> {
    serde_json::from_str(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dirsync_core::StagedRow;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn department(id: i64, name: &str, parent_id: Option<i64>) -> Department {
        Department {
            id,
            category_id: 1,
            name: name.to_string(),
            code: format!("D{id}"),
            parent_id,
            enabled: true,
            placement: TreePlacement::default(),
            extras: Extras::from([("type".to_string(), json!("organizationalUnit"))]),
        }
    }

    fn profile(id: i64, username: &str) -> Profile {
        Profile {
            id,
            category_id: 1,
            domain: "corp.example".to_string(),
            username: username.to_string(),
            display_name: username.to_uppercase(),
            email: format!("{username}@corp.example"),
            telephone: String::new(),
            code: format!("P{id}"),
            status: ProfileStatus::Normal,
            enabled: true,
            extras: Extras::new(),
        }
    }

    #[test]
    fn migration_creates_directory_tables() {
        let db = DirectoryStore::open_in_memory().expect("open db");

        for table in [
            "departments",
            "profiles",
            "department_memberships",
            "leadership_edges",
        ] {
            assert!(db.table_exists(table).expect("table check"));
        }

        assert_eq!(
            db.schema_version().expect("schema version"),
            DIRECTORY_SCHEMA_VERSION
        );
    }

    #[test]
    fn newer_schema_version_is_refused() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let conn = Connection::open(file.path()).expect("raw open");
            conn.execute("PRAGMA user_version = 9", []).expect("bump");
        }

        let err = match DirectoryStore::open(file.path()) {
            Err(err) => err,
            Ok(_) => panic!("future schema should be rejected"),
        };
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 9, .. }
        ));
    }

    #[test]
    fn category_queries_roundtrip_rows() {
        let db = DirectoryStore::open_in_memory().expect("open db");
        db.upsert_department(&department(1, "Org", None))
            .expect("org");
        db.upsert_department(&department(2, "Team", Some(1)))
            .expect("team");
        let mut other = department(3, "Elsewhere", None);
        other.category_id = 2;
        db.upsert_department(&other).expect("other category");
        db.upsert_profile(&profile(10, "alice")).expect("alice");

        let departments = db.departments_for_category(1).expect("departments");
        assert_eq!(departments.len(), 2);
        assert_eq!(departments[1].parent_id, Some(1));
        assert_eq!(departments[1].extras["type"], json!("organizationalUnit"));

        let alice = db
            .profile_by_username(1, "alice")
            .expect("query")
            .expect("alice present");
        assert_eq!(alice, profile(10, "alice"));

        assert_eq!(
            db.max_ids().expect("max ids"),
            IdWatermarks {
                department: 3,
                profile: 10
            }
        );
    }

    #[test]
    fn leadership_lookup_filters_by_source_profile() {
        let db = DirectoryStore::open_in_memory().expect("open db");
        for (from, to) in [(1, 2), (1, 3), (4, 1)] {
            assert!(db
                .insert_leadership_edge(&LeadershipEdge {
                    from_profile_id: from,
                    to_profile_id: to,
                })
                .expect("insert edge"));
        }

        let edges = db.leadership_edges_from(&[1]).expect("edges");
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|edge| edge.from_profile_id == 1));
        assert!(db.leadership_edges_from(&[]).expect("empty").is_empty());
    }

    #[test]
    fn leadership_lookup_matches_either_endpoint() {
        let db = DirectoryStore::open_in_memory().expect("open db");
        for (from, to) in [(1, 2), (4, 1), (5, 6)] {
            db.insert_leadership_edge(&LeadershipEdge {
                from_profile_id: from,
                to_profile_id: to,
            })
            .expect("insert edge");
        }

        let edges = db.leadership_edges_touching(&[1]).expect("edges");
        assert_eq!(
            edges,
            vec![
                LeadershipEdge {
                    from_profile_id: 1,
                    to_profile_id: 2,
                },
                LeadershipEdge {
                    from_profile_id: 4,
                    to_profile_id: 1,
                },
            ]
        );
        assert_eq!(
            db.fetch_leadership_edges(&[1, 2]).expect("source edges").len(),
            2
        );
        assert!(db.leadership_edges_touching(&[]).expect("empty").is_empty());
    }

    #[test]
    fn undecodable_profile_row_is_reported_as_corrupt() {
        let db = DirectoryStore::open_in_memory().expect("open db");
        db.upsert_profile(&profile(10, "alice")).expect("alice");
        db.conn
            .execute("UPDATE profiles SET status = 'retired' WHERE id = 10", [])
            .expect("corrupt status");

        assert!(matches!(
            db.profiles_for_category(1),
            Err(StorageError::CorruptRow {
                table: "profiles",
                ..
            })
        ));
        assert!(matches!(
            db.fetch_profiles(1),
            Err(SourceError::CorruptRow {
                table: "profiles",
                ..
            })
        ));
    }

    #[test]
    fn commit_applies_rows_and_replaces_scoped_relations() {
        let mut db = DirectoryStore::open_in_memory().expect("open db");
        db.upsert_department(&department(1, "Org", None))
            .expect("org");
        db.upsert_profile(&profile(10, "alice")).expect("alice");
        db.upsert_profile(&profile(11, "bob")).expect("bob");
        for (from, to) in [(10, 11), (11, 10)] {
            db.insert_leadership_edge(&LeadershipEdge {
                from_profile_id: from,
                to_profile_id: to,
            })
            .expect("edge");
        }

        let mut renamed = department(1, "Org", None);
        renamed.code = "ORG".to_string();
        let writes = StagedWrites {
            category_id: 1,
            departments: vec![
                StagedRow {
                    operation: SyncOperation::Update,
                    entity: renamed,
                },
                StagedRow {
                    operation: SyncOperation::Insert,
                    entity: department(2, "Team", Some(1)),
                },
            ],
            profiles: vec![StagedRow {
                operation: SyncOperation::Update,
                entity: profile(10, "alice"),
            }],
            memberships: vec![DepartmentMembership {
                profile_id: 10,
                department_id: 2,
            }],
            leadership_edges: Vec::new(),
            relation_scope: vec![10],
        };

        let report = db.commit(&writes, ts()).expect("commit");
        assert_eq!(report.departments_inserted, 1);
        assert_eq!(report.departments_updated, 1);
        assert_eq!(report.profiles_updated, 1);
        assert_eq!(report.memberships_written, 1);
        assert_eq!(report.leadership_edges_removed, 2);

        let departments = db.departments_for_category(1).expect("departments");
        assert_eq!(departments[0].code, "ORG");
        assert_eq!(departments[1].parent_id, Some(1));
        assert!(db.leadership_edges_touching(&[10]).expect("edges").is_empty());
        assert_eq!(
            db.memberships_for_profile(10).expect("memberships"),
            vec![DepartmentMembership {
                profile_id: 10,
                department_id: 2,
            }]
        );
        assert_eq!(db.last_synced_at(1).expect("last sync"), Some(ts()));
    }

    #[test]
    fn failed_commit_rolls_back_everything() {
        let mut db = DirectoryStore::open_in_memory().expect("open db");
        let writes = StagedWrites {
            category_id: 1,
            departments: vec![StagedRow {
                operation: SyncOperation::Insert,
                entity: department(1, "Org", None),
            }],
            profiles: vec![StagedRow {
                operation: SyncOperation::Update,
                entity: profile(99, "ghost"),
            }],
            ..StagedWrites::default()
        };

        let err = db.commit(&writes, ts()).expect_err("ghost update must fail");
        assert!(matches!(
            err,
            StorageError::MissingRow {
                table: "profiles",
                id: 99
            }
        ));
        assert!(db.departments_for_category(1).expect("departments").is_empty());
        assert_eq!(db.last_synced_at(1).expect("last sync"), None);
    }
}
