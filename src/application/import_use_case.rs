// ============================================================
// Layer 2 — Import Use Case
// ============================================================
// Loads MovieLens-style CSV exports into the SQLite store:
//
//   ratings.csv  userId,movieId,rating,timestamp
//   movies.csv   movieId,title,genres          (optional)
//
// Both files are streamed record by record through the `csv` crate
// and written in batched transactions, so importing tens of millions of ratings needs only
// one batch worth of memory. Rows that cannot be parsed are skipped
// with a warning; they never abort the import.
//
// Ratings are appended: importing the same file twice duplicates it.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize};
use std::{fs::File, io::Read, path::Path};

use crate::data::store::{MovieRow, RatingRow, SqliteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub db_path:     String,
    pub ratings_csv: String,
    pub movies_csv:  Option<String>,
    /// Rows per transaction
    pub batch_size:  usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub ratings: u64,
    pub movies:  u64,
    /// Malformed rows across both files
    pub skipped: u64,
}

// ─── CSV Records ─────────────────────────────────────────────────────────────
// Columns are matched by header name, so extra columns are ignored.
#[derive(Debug, Deserialize)]
struct RatingRecord {
    #[serde(rename = "userId")]
    user_id:   i64,
    #[serde(rename = "movieId")]
    movie_id:  i64,
    rating:    f32,
    // A missing or unparsable timestamp is not worth dropping the rating for.
    #[serde(default, deserialize_with = "csv::invalid_option")]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MovieRecord {
    #[serde(rename = "movieId")]
    movie_id: i64,
    title:    String,
    #[serde(default)]
    genres:   String,
}

impl TryFrom<RatingRecord> for RatingRow {
    type Error = anyhow::Error;

    fn try_from(r: RatingRecord) -> Result<Self> {
        anyhow::ensure!(r.rating.is_finite(), "rating {} is not a number", r.rating);
        Ok(RatingRow { user_id: r.user_id, movie_id: r.movie_id, rating: r.rating, timestamp: r.timestamp })
    }
}

impl TryFrom<MovieRecord> for MovieRow {
    type Error = anyhow::Error;

    fn try_from(m: MovieRecord) -> Result<Self> {
        Ok(MovieRow { movie_id: m.movie_id, title: m.title, genres: m.genres })
    }
}

pub struct ImportUseCase {
    config: ImportConfig,
}

impl ImportUseCase {
    pub fn new(config: ImportConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<ImportSummary> {
        let cfg = &self.config;
        anyhow::ensure!(cfg.batch_size > 0, "batch_size must be positive");

        let mut store = SqliteStore::create(&cfg.db_path)
            .with_context(|| format!("Cannot create ratings store '{}'", cfg.db_path))?;
        let mut summary = ImportSummary::default();

        if let Some(movies) = &cfg.movies_csv {
            tracing::info!("Importing movies from '{movies}'");
            let (rows, skipped) = import_movies(&mut store, open(movies)?, cfg.batch_size)?;
            summary.movies   = rows;
            summary.skipped += skipped;
        }

        tracing::info!("Importing ratings from '{}'", cfg.ratings_csv);
        let (rows, skipped) = import_ratings(&mut store, open(&cfg.ratings_csv)?, cfg.batch_size)?;
        summary.ratings  = rows;
        summary.skipped += skipped;

        tracing::info!(
            "Import finished: {} ratings, {} movies, {} rows skipped; the store now holds {} ratings",
            summary.ratings,
            summary.movies,
            summary.skipped,
            store.rating_count()?
        );
        Ok(summary)
    }
}

fn open(path: impl AsRef<Path>) -> Result<File> {
    let path = path.as_ref();
    File::open(path).with_context(|| format!("Cannot open '{}'", path.display()))
}

/// Returns (rows imported, rows skipped).
pub fn import_ratings<R: Read>(
    store:      &mut SqliteStore,
    reader:     R,
    batch_size: usize,
) -> Result<(u64, u64)> {
    import_rows::<RatingRecord, RatingRow, _>(reader, batch_size, "rating", |rows| {
        Ok(store.insert_ratings(rows)?)
    })
}

/// Returns (rows imported, rows skipped).
pub fn import_movies<R: Read>(
    store:      &mut SqliteStore,
    reader:     R,
    batch_size: usize,
) -> Result<(u64, u64)> {
    import_rows::<MovieRecord, MovieRow, _>(reader, batch_size, "movie", |rows| {
        Ok(store.insert_movies(rows)?)
    })
}

/// Streams records of type `T` out of a headed CSV source and flushes
/// them in chunks of `batch_size`. Records that fail to deserialize or
/// convert are skipped; I/O errors abort.
fn import_rows<T, Row, R>(
    reader:     R,
    batch_size: usize,
    what:       &str,
    mut flush:  impl FnMut(&[Row]) -> Result<usize>,
) -> Result<(u64, u64)>
where
    T: DeserializeOwned,
    Row: TryFrom<T, Error = anyhow::Error>,
    R: Read,
{
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut pending = Vec::with_capacity(batch_size);
    let (mut imported, mut skipped) = (0u64, 0u64);

    for record in csv.deserialize::<T>() {
        let line = match &record {
            Err(e) if e.is_io_error() => {
                return Err(anyhow::anyhow!("Cannot read CSV input: {e}"));
            }
            Err(e) => e.position().map(|p| p.line()),
            Ok(_) => None,
        };
        match record.map_err(anyhow::Error::from).and_then(Row::try_from) {
            Ok(row) => pending.push(row),
            Err(e) => {
                match line {
                    Some(line) => tracing::warn!("Skipping {what} on line {line}: {e:#}"),
                    None       => tracing::warn!("Skipping {what}: {e:#}"),
                }
                skipped += 1;
            }
        }
        if pending.len() >= batch_size {
            imported += flush(&pending)? as u64;
            pending.clear();
            tracing::debug!("Imported {imported} {what} rows");
        }
    }
    if !pending.is_empty() {
        imported += flush(&pending)? as u64;
    }
    Ok((imported, skipped))
}
