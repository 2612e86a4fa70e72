// ============================================================
// Layer 4 — SQLite Ratings Store
// ============================================================
// The backing relational store. Two relations:
//
//   ratings(id INTEGER PRIMARY KEY, user_id, movie_id, rating, timestamp)
//   movies(movie_id INTEGER PRIMARY KEY, title, genres)      -- optional
//
// `ratings.id` is the stable ordering key: pages are fetched with
// keyset pagination (`WHERE id > ? ORDER BY id LIMIT ?`), so every
// page costs the same no matter how deep into the table the stream
// is, and resuming only needs the last key seen.
//
// A missing `movies` table is not fatal: it is logged once and the
// store reports "no metadata", which zeroes the genre/year slots.
// A missing `ratings` table is fatal.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use thiserror::Error;

use crate::data::metadata;
use crate::domain::rating::{Cardinality, ItemMetadata, KeyedExample, RatedItem, RatingExample};
use crate::domain::traits::{InteractionSource, RatingSource};

const RATINGS_TABLE: &str = "ratings";
const MOVIES_TABLE:  &str = "movies";

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS ratings (
        id        INTEGER PRIMARY KEY,
        user_id   INTEGER NOT NULL,
        movie_id  INTEGER NOT NULL,
        rating    REAL    NOT NULL,
        timestamp INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_ratings_user  ON ratings(user_id);
    CREATE INDEX IF NOT EXISTS idx_ratings_movie ON ratings(movie_id);
    CREATE TABLE IF NOT EXISTS movies (
        movie_id INTEGER PRIMARY KEY,
        title    TEXT,
        genres   TEXT
    );
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ratings store not found at '{0}'")]
    NotFound(String),
    #[error("required table `{0}` is missing from the ratings store")]
    MissingTable(&'static str),
    #[error("ratings store temporarily unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Busy/locked databases and I/O hiccups are worth retrying;
    /// schema and configuration problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
            ),
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// One row of the ratings relation, as imported.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingRow {
    pub user_id:   i64,
    pub movie_id:  i64,
    pub rating:    f32,
    pub timestamp: Option<i64>,
}

/// One row of the item-metadata relation, as imported.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieRow {
    pub movie_id: i64,
    pub title:    String,
    pub genres:   String,
}

pub struct SqliteStore {
    conn:         Connection,
    has_metadata: bool,
}

impl SqliteStore {
    /// Open an existing store read-only. Fails fast when the file or the
    /// ratings relation is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Open (or create) a writable store and make sure the schema exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Self::from_connection(conn)
    }

    /// A fresh in-memory store with the full schema.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Self::from_connection(conn)
    }

    pub(crate) fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;

        if !table_exists(&conn, RATINGS_TABLE)? {
            return Err(StoreError::MissingTable(RATINGS_TABLE));
        }
        let has_metadata = table_exists(&conn, MOVIES_TABLE)?;
        if !has_metadata {
            tracing::warn!(
                "Table `{}` not found; item genres and release years will be treated as unknown",
                MOVIES_TABLE
            );
        }
        Ok(Self { conn, has_metadata })
    }

    #[cfg(test)]
    pub fn has_metadata(&self) -> bool {
        self.has_metadata
    }

    pub fn rating_count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ratings", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Append ratings in a single transaction. Row ids (the ordering key)
    /// are assigned in insertion order.
    pub fn insert_ratings(&mut self, rows: &[RatingRow]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO ratings (user_id, movie_id, rating, timestamp) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for r in rows {
                stmt.execute(params![r.user_id, r.movie_id, r.rating as f64, r.timestamp])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Insert or replace item metadata in a single transaction.
    pub fn insert_movies(&mut self, rows: &[MovieRow]) -> Result<usize, StoreError> {
        if !self.has_metadata {
            return Err(StoreError::MissingTable(MOVIES_TABLE));
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO movies (movie_id, title, genres) VALUES (?1, ?2, ?3)",
            )?;
            for m in rows {
                stmt.execute(params![m.movie_id, m.title, m.genres])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn page_sql(&self) -> &'static str {
        if self.has_metadata {
            "SELECT r.id, r.user_id, r.movie_id, r.rating, m.title, m.genres
               FROM ratings r LEFT JOIN movies m ON m.movie_id = r.movie_id
              WHERE r.id > ?1 ORDER BY r.id LIMIT ?2"
        } else {
            "SELECT r.id, r.user_id, r.movie_id, r.rating, NULL, NULL
               FROM ratings r
              WHERE r.id > ?1 ORDER BY r.id LIMIT ?2"
        }
    }

    fn history_sql(&self) -> &'static str {
        if self.has_metadata {
            "SELECT r.movie_id, r.rating, m.genres
               FROM ratings r LEFT JOIN movies m ON m.movie_id = r.movie_id
              WHERE r.user_id = ?1 ORDER BY r.id"
        } else {
            "SELECT r.movie_id, r.rating, NULL FROM ratings r WHERE r.user_id = ?1 ORDER BY r.id"
        }
    }
}

impl RatingSource for SqliteStore {
    fn fetch_page(
        &self,
        after_key: Option<i64>,
        limit:     usize,
    ) -> Result<Vec<KeyedExample>, StoreError> {
        let mut stmt = self.conn.prepare_cached(self.page_sql())?;
        let rows = stmt.query_map(
            params![after_key.unwrap_or(i64::MIN), limit as i64],
            |row| {
                let title:  Option<String> = row.get(4)?;
                let genres: Option<String> = row.get(5)?;
                let meta = metadata::item_metadata(title.as_deref(), genres.as_deref());
                let rating: f64 = row.get(3)?;
                Ok(KeyedExample {
                    key:     row.get(0)?,
                    example: RatingExample::new(row.get(1)?, row.get(2)?, rating as f32)
                        .with_genres(meta.genres)
                        .with_release_year(meta.release_year),
                })
            },
        )?;
        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }

    fn key_before(&self, offset: u64) -> Result<Option<i64>, StoreError> {
        if offset == 0 {
            return Ok(None);
        }
        let key = self
            .conn
            .query_row(
                "SELECT id FROM ratings ORDER BY id LIMIT 1 OFFSET ?1",
                params![(offset - 1) as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    fn cardinality(&self) -> Result<Cardinality, StoreError> {
        let (users, items): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(DISTINCT user_id), COUNT(DISTINCT movie_id) FROM ratings",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(Cardinality { users: users.max(0) as usize, items: items.max(0) as usize })
    }
}

impl InteractionSource for SqliteStore {
    fn user_history(&self, user_id: i64) -> Result<Vec<RatedItem>, StoreError> {
        let mut stmt = self.conn.prepare_cached(self.history_sql())?;
        let rows = stmt.query_map(params![user_id], |row| {
            let genres: Option<String> = row.get(2)?;
            let rating: f64 = row.get(1)?;
            Ok(RatedItem {
                item_id: row.get(0)?,
                rating:  rating as f32,
                genres:  genres.as_deref().map(metadata::parse_genres).unwrap_or_default(),
            })
        })?;
        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }

    fn item_metadata(&self, item_id: i64) -> Result<Option<ItemMetadata>, StoreError> {
        if !self.has_metadata {
            return Ok(None);
        }
        let meta = self
            .conn
            .query_row(
                "SELECT title, genres FROM movies WHERE movie_id = ?1",
                params![item_id],
                |row| {
                    let title:  Option<String> = row.get(0)?;
                    let genres: Option<String> = row.get(1)?;
                    Ok(metadata::item_metadata(title.as_deref(), genres.as_deref()))
                },
            )
            .optional()?;
        Ok(meta)
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::genre::Genre;

    fn seeded_store() -> SqliteStore {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .insert_movies(&[
                MovieRow { movie_id: 10, title: "Heat (1995)".into(),  genres: "Action|Crime".into() },
                MovieRow { movie_id: 20, title: "Up (2009)".into(),    genres: "Animation".into() },
                MovieRow { movie_id: 30, title: "Untitled".into(),     genres: "".into() },
            ])
            .unwrap();
        store
            .insert_ratings(&[
                RatingRow { user_id: 1, movie_id: 10, rating: 5.0, timestamp: None },
                RatingRow { user_id: 1, movie_id: 20, rating: 3.0, timestamp: None },
                RatingRow { user_id: 2, movie_id: 10, rating: 4.0, timestamp: Some(7) },
                RatingRow { user_id: 2, movie_id: 30, rating: 2.0, timestamp: None },
                RatingRow { user_id: 3, movie_id: 40, rating: 4.5, timestamp: None },
            ])
            .unwrap();
        store
    }

    #[test]
    fn pages_follow_key_order() {
        let store = seeded_store();
        let first = store.fetch_page(None, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].example.user_id, 1);
        assert_eq!(first[0].example.genres, vec![Genre::Action, Genre::Crime]);
        assert_eq!(first[0].example.release_year, Some(1995));

        let rest = store.fetch_page(Some(first[1].key), 10).unwrap();
        assert_eq!(rest.len(), 3);
        assert!(rest.windows(2).all(|w| w[0].key < w[1].key));
        // Item 40 has no metadata row
        assert!(rest[2].example.genres.is_empty());
        assert_eq!(rest[2].example.release_year, None);
    }

    #[test]
    fn key_before_matches_positions() {
        let store = seeded_store();
        let all = store.fetch_page(None, 10).unwrap();
        assert_eq!(store.key_before(0).unwrap(), None);
        assert_eq!(store.key_before(3).unwrap(), Some(all[2].key));
        assert_eq!(store.key_before(99).unwrap(), None);
    }

    #[test]
    fn cardinality_counts_distinct_ids() {
        let store = seeded_store();
        assert_eq!(store.cardinality().unwrap(), Cardinality { users: 3, items: 4 });
        assert_eq!(store.rating_count().unwrap(), 5);
    }

    #[test]
    fn user_history_joins_genres() {
        let store = seeded_store();
        let history = store.user_history(1).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].item_id, 20);
        assert_eq!(history[1].genres, vec![Genre::Animation]);
        assert!(store.user_history(99).unwrap().is_empty());
    }

    #[test]
    fn item_metadata_lookup() {
        let store = seeded_store();
        let heat = store.item_metadata(10).unwrap().unwrap();
        assert_eq!(heat.release_year, Some(1995));
        let untitled = store.item_metadata(30).unwrap().unwrap();
        assert_eq!(untitled, ItemMetadata::default());
        assert!(store.item_metadata(40).unwrap().is_none());
    }

    #[test]
    fn missing_movies_table_degrades_to_no_metadata() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ratings (id INTEGER PRIMARY KEY, user_id INTEGER, movie_id INTEGER, rating REAL, timestamp INTEGER);
             INSERT INTO ratings (user_id, movie_id, rating) VALUES (1, 10, 4.0);",
        )
        .unwrap();
        let store = SqliteStore::from_connection(conn).unwrap();
        assert!(!store.has_metadata());
        let page = store.fetch_page(None, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert!(page[0].example.genres.is_empty());
        assert!(store.item_metadata(10).unwrap().is_none());
        assert!(store.user_history(1).unwrap()[0].genres.is_empty());
    }

    #[test]
    fn missing_ratings_table_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        let err = SqliteStore::from_connection(conn).err().unwrap();
        assert!(matches!(err, StoreError::MissingTable("ratings")));
        assert!(!err.is_transient());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = SqliteStore::open("/definitely/not/here.db").err().unwrap();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn busy_is_transient() {
        let busy = StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_transient());
        assert!(StoreError::Unavailable("network share".into()).is_transient());
    }
}
