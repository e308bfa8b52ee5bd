//! C5: Embedding store.
//!
//! Single-writer persistent catalog of enrolled users and an append-only
//! authentication audit log, backed by `rusqlite` (bundled SQLite).
//! Schema matches spec.md §4.5 verbatim. Grounded on the `rusqlite`
//! choice shared by the `kmay89-securaCV` and `sovren-software-visage`
//! manifests in the reference pack — both pick an embedded single-file
//! SQLite database for the same face-auth domain, in place of the
//! teacher's per-user JSON files (`pam-glance/src/config.rs::SecureDatabase`).

use crate::error::StoreError;
use crate::frame::Embedding;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub embeddings: Vec<Embedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub use_count: u64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct AuthLog {
    pub id: i64,
    pub user_id: Option<String>,
    pub username: String,
    pub success: bool,
    pub confidence: f32,
    pub liveness_passed: bool,
    pub challenge_passed: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A candidate match from `find_best_match`.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub user: Option<User>,
    pub score: f32,
}

/// Serializes all access behind a single mutex (spec.md §5: "C5's DB
/// handle — serialized; readers and writers both acquire").
pub struct EmbeddingStore {
    conn: Mutex<Connection>,
}

impl EmbeddingStore {
    pub fn open(database_path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Ok(meta) = std::fs::metadata(parent) {
                        let mut perms = meta.permissions();
                        perms.set_mode(0o755);
                        let _ = std::fs::set_permissions(parent, perms);
                    }
                }
            }
        }

        let conn = Connection::open(database_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn create_user(&self, username: &str, embeddings: Vec<Embedding>) -> Result<User, StoreError> {
        validate_embeddings(&embeddings)?;
        let id = user_id(username);
        let now = Utc::now();
        let blob = encode_embeddings(&embeddings)?;

        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::UserExists(username.to_string()));
        }

        conn.execute(
            "INSERT INTO users (id, username, embeddings, created_at, updated_at, last_used_at, use_count, active)
             VALUES (?1, ?2, ?3, ?4, ?4, NULL, 0, 1)",
            params![id, username, blob, now.to_rfc3339()],
        )?;

        Ok(User {
            id,
            username: username.to_string(),
            embeddings,
            created_at: now,
            updated_at: now,
            last_used_at: None,
            use_count: 0,
            active: true,
        })
    }

    pub fn get_user(&self, username: &str) -> Result<User, StoreError> {
        let conn = self.conn.lock().unwrap();
        row_to_user(&conn, "username = ?1", username)?.ok_or_else(|| StoreError::NotFound(username.to_string()))
    }

    pub fn update_user(&self, username: &str, embeddings: Vec<Embedding>) -> Result<User, StoreError> {
        validate_embeddings(&embeddings)?;
        let blob = encode_embeddings(&embeddings)?;
        let now = Utc::now();

        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE users SET embeddings = ?1, updated_at = ?2 WHERE username = ?3",
            params![blob, now.to_rfc3339(), username],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(username.to_string()));
        }

        row_to_user(&conn, "username = ?1", username)?.ok_or_else(|| StoreError::NotFound(username.to_string()))
    }

    pub fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM users WHERE username = ?1", params![username])?;
        if affected == 0 {
            return Err(StoreError::NotFound(username.to_string()));
        }
        Ok(())
    }

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, username, embeddings, created_at, updated_at, last_used_at, use_count, active FROM users ORDER BY username")?;
        let rows = stmt.query_map([], map_user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Walks all active users' embeddings and returns the single closest
    /// match by cosine similarity, regardless of threshold; the caller
    /// decides pass/fail by comparing `score` against `threshold`.
    pub fn find_best_match(&self, query: &[f32], threshold: f32) -> Result<MatchResult, StoreError> {
        let users = self.list_active_users()?;
        let mut best_user: Option<User> = None;
        let mut best_score = 0.0f32;

        for user in users {
            for embedding in &user.embeddings {
                let score = cosine_similarity(query, embedding);
                if score > best_score {
                    best_score = score;
                    best_user = Some(user.clone());
                }
            }
        }

        if best_score < threshold {
            Ok(MatchResult {
                user: None,
                score: best_score,
            })
        } else {
            Ok(MatchResult {
                user: best_user,
                score: best_score,
            })
        }
    }

    /// Finds the best match restricted to a single username's embeddings
    /// (used by `authenticate_user`, spec.md §4.9).
    pub fn find_best_match_for_user(&self, username: &str, query: &[f32], threshold: f32) -> Result<MatchResult, StoreError> {
        let user = self.get_user(username)?;
        let mut best_score = 0.0f32;
        for embedding in &user.embeddings {
            let score = cosine_similarity(query, embedding);
            if score > best_score {
                best_score = score;
            }
        }
        if best_score < threshold {
            Ok(MatchResult {
                user: None,
                score: best_score,
            })
        } else {
            Ok(MatchResult {
                user: Some(user),
                score: best_score,
            })
        }
    }

    pub fn record_auth(
        &self,
        user_id: Option<&str>,
        username: &str,
        success: bool,
        confidence: f32,
        liveness_passed: bool,
        challenge_passed: bool,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auth_logs (user_id, username, success, confidence, liveness_passed, challenge_passed, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![user_id, username, success, confidence, liveness_passed, challenge_passed, error_message, now.to_rfc3339()],
        )?;

        if success {
            if let Some(uid) = user_id {
                conn.execute(
                    "UPDATE users SET last_used_at = ?1, use_count = use_count + 1 WHERE id = ?2",
                    params![now.to_rfc3339(), uid],
                )?;
            }
        }

        Ok(())
    }

    pub fn list_auth_logs(&self) -> Result<Vec<AuthLog>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, username, success, confidence, liveness_passed, challenge_passed, error_message, created_at
             FROM auth_logs ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AuthLog {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                success: row.get(3)?,
                confidence: row.get(4)?,
                liveness_passed: row.get(5)?,
                challenge_passed: row.get(6)?,
                error_message: row.get(7)?,
                created_at: parse_timestamp(row.get::<_, String>(8)?),
            })
        })?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }

    fn list_active_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, username, embeddings, created_at, updated_at, last_used_at, use_count, active
             FROM users WHERE active = 1 ORDER BY username",
        )?;
        let rows = stmt.query_map([], map_user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    embeddings BLOB NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_used_at TEXT,
    use_count INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS auth_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    username TEXT NOT NULL,
    success INTEGER NOT NULL,
    confidence REAL NOT NULL,
    liveness_passed INTEGER NOT NULL,
    challenge_passed INTEGER NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL
);
";

fn row_to_user(conn: &Connection, clause: &str, value: &str) -> Result<Option<User>, StoreError> {
    let sql = format!(
        "SELECT id, username, embeddings, created_at, updated_at, last_used_at, use_count, active FROM users WHERE {}",
        clause
    );
    conn.query_row(&sql, params![value], map_user_row).optional().map_err(StoreError::from)
}

fn map_user_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let blob: Vec<u8> = row.get(2)?;
    let embeddings = decode_embeddings(&blob).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Blob, Box::new(e))
    })?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        embeddings,
        created_at: parse_timestamp(row.get::<_, String>(3)?),
        updated_at: parse_timestamp(row.get::<_, String>(4)?),
        last_used_at: row.get::<_, Option<String>>(5)?.map(parse_timestamp),
        use_count: row.get::<_, i64>(6)? as u64,
        active: row.get::<_, bool>(7)?,
    })
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn validate_embeddings(embeddings: &[Embedding]) -> Result<(), StoreError> {
    if embeddings.is_empty() {
        return Err(StoreError::Invalid("at least one embedding is required".to_string()));
    }
    let len = embeddings[0].len();
    if len == 0 || embeddings.iter().any(|e| e.len() != len) {
        return Err(StoreError::Invalid("all embeddings must share a non-zero length".to_string()));
    }
    Ok(())
}

fn encode_embeddings(embeddings: &[Embedding]) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(embeddings).map_err(StoreError::from)
}

fn decode_embeddings(blob: &[u8]) -> Result<Vec<Embedding>, StoreError> {
    bincode::deserialize(blob).map_err(StoreError::from)
}

/// Deterministic user id: first 16 bytes of SHA-256(username), hex-encoded.
pub fn user_id(username: &str) -> String {
    let digest = Sha256::digest(username.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// `Σ aᵢbᵢ / (‖a‖·‖b‖)`, dividing by the product of the norms — the
/// corrected formula per spec.md §4.5/§9 (the original source divides by
/// the product of *squared* norms, a defect this implementation does not
/// reproduce). Defensive zero-norm handling returns 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: &[f32]) -> Embedding {
        let mut v = vec![0.0; 512];
        for (i, &val) in values.iter().enumerate() {
            v[i] = val;
        }
        v
    }

    #[test]
    fn cosine_identity_and_opposite() {
        let x = embedding(&[1.0, 2.0, 3.0]);
        let neg_x: Embedding = x.iter().map(|v| -v).collect();
        assert!((cosine_similarity(&x, &x) - 1.0).abs() < 1e-3);
        assert!((cosine_similarity(&x, &neg_x) - (-1.0)).abs() < 1e-3);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let x = embedding(&[1.0, 0.0]);
        let y = embedding(&[0.0, 1.0]);
        assert!(cosine_similarity(&x, &y).abs() < 1e-3);
    }

    #[test]
    fn cosine_symmetric() {
        let a = embedding(&[1.0, 2.0, -3.0]);
        let b = embedding(&[4.0, -5.0, 6.0]);
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let zero = vec![0.0f32; 8];
        let other = embedding(&[1.0, 1.0]);
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
    }

    #[test]
    fn round_trip_storage() {
        let store = EmbeddingStore::open_in_memory().unwrap();
        let embs = vec![embedding(&[1.0, 0.0, 0.0])];
        store.create_user("alice", embs.clone()).unwrap();
        let fetched = store.get_user("alice").unwrap();
        assert_eq!(fetched.embeddings, embs);
    }

    #[test]
    fn duplicate_username_rejected() {
        let store = EmbeddingStore::open_in_memory().unwrap();
        store.create_user("alice", vec![embedding(&[1.0])]).unwrap();
        assert!(matches!(
            store.create_user("alice", vec![embedding(&[1.0])]),
            Err(StoreError::UserExists(_))
        ));
    }

    #[test]
    fn find_best_match_enroll_and_query() {
        // S1/S2 seed scenarios from spec.md §8.
        let store = EmbeddingStore::open_in_memory().unwrap();
        let mut e1 = vec![0.0f32; 512];
        e1[0] = 1.0;
        store.create_user("alice", vec![e1]).unwrap();

        let mut q = vec![0.0f32; 512];
        q[0] = 0.99;
        q[1] = 0.141;
        let result = store.find_best_match(&q, 0.6).unwrap();
        assert!(result.user.is_some());
        assert!((result.score - 0.99).abs() < 0.02);

        let mut orthogonal = vec![0.0f32; 512];
        orthogonal[1] = 1.0;
        let miss = store.find_best_match(&orthogonal, 0.6).unwrap();
        assert!(miss.user.is_none());
        assert!(miss.score.abs() < 0.1);
    }

    #[test]
    fn delete_is_immediately_visible() {
        let store = EmbeddingStore::open_in_memory().unwrap();
        store.create_user("bob", vec![embedding(&[1.0])]).unwrap();
        store.delete_user("bob").unwrap();
        assert!(matches!(store.get_user("bob"), Err(StoreError::NotFound(_))));
        assert!(store.list_users().unwrap().is_empty());
    }

    #[test]
    fn audit_log_is_append_only_and_ordered() {
        let store = EmbeddingStore::open_in_memory().unwrap();
        for i in 0..3 {
            store
                .record_auth(None, "carol", false, 0.1 * i as f32, false, false, Some("no match"))
                .unwrap();
        }
        let logs = store.list_auth_logs().unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn record_auth_bumps_use_count_on_success() {
        let store = EmbeddingStore::open_in_memory().unwrap();
        let user = store.create_user("dave", vec![embedding(&[1.0])]).unwrap();
        store
            .record_auth(Some(&user.id), "dave", true, 0.95, true, true, None)
            .unwrap();
        let updated = store.get_user("dave").unwrap();
        assert_eq!(updated.use_count, 1);
        assert!(updated.last_used_at.is_some());
    }
}
