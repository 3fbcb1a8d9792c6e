use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};

use crate::config::AppConfig;
use crate::models::{Chapter, ChapterSource, Chunk, ChunkId, Novel, StoredChunk};

const CHUNK_COLUMNS: &str = "chunks.id, chunks.novel_id, chunks.chapter_id, chapters.chapter_number, \
     chunks.chunk_number, chunks.content, chunks.token_count";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::connect(&config.sqlite_dsn()).await
    }

    pub async fn connect(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS novels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                novel_id INTEGER NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
                chapter_number INTEGER NOT NULL,
                title TEXT,
                content TEXT NOT NULL,
                UNIQUE (novel_id, chapter_number)
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                novel_id INTEGER NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
                chapter_id INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
                chunk_number INTEGER NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS chunks_by_novel ON chunks (novel_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_novel(&self, title: &str) -> Result<Novel> {
        sqlx::query("INSERT OR IGNORE INTO novels (title, created_at) VALUES (?, ?)")
            .bind(title)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        self.novel_by_title(title)
            .await?
            .ok_or_else(|| anyhow::anyhow!("novel vanished after insert: {title}"))
    }

    pub async fn novel_by_title(&self, title: &str) -> Result<Option<Novel>> {
        let row = sqlx::query("SELECT id, title, created_at FROM novels WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(row_to_novel))
    }

    pub async fn list_novels(&self) -> Result<Vec<Novel>> {
        let rows = sqlx::query("SELECT id, title, created_at FROM novels ORDER BY title ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(row_to_novel).collect())
    }

    pub async fn chapter_numbers(&self, novel_id: i64) -> Result<HashSet<i64>> {
        let rows = sqlx::query("SELECT chapter_number FROM chapters WHERE novel_id = ?")
            .bind(novel_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<i64, _>("chapter_number"))
            .collect())
    }

    pub async fn insert_chapters(&self, novel_id: i64, chapters: &[ChapterSource]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chapter in chapters {
            sqlx::query(
                r#"
                INSERT INTO chapters (novel_id, chapter_number, title, content)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(novel_id)
            .bind(chapter.chapter_number)
            .bind(&chapter.title)
            .bind(&chapter.content)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn chapters_for_novel(&self, novel_id: i64) -> Result<Vec<Chapter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, novel_id, chapter_number, title, content
            FROM chapters
            WHERE novel_id = ?
            ORDER BY chapter_number ASC
            "#,
        )
        .bind(novel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_chapter).collect())
    }

    /// Chapters of a novel that have no chunk rows yet, in chapter order.
    pub async fn unchunked_chapters(&self, novel_id: i64) -> Result<Vec<Chapter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, novel_id, chapter_number, title, content
            FROM chapters
            WHERE novel_id = ?
              AND NOT EXISTS (SELECT 1 FROM chunks WHERE chunks.chapter_id = chapters.id)
            ORDER BY chapter_number ASC
            "#,
        )
        .bind(novel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_chapter).collect())
    }

    pub async fn count_chunks(&self, novel_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE novel_id = ?")
            .bind(novel_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("n"))
    }

    pub async fn delete_chunks(&self, novel_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE novel_id = ?")
            .bind(novel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stores one chapter's chunks in a single transaction.
    pub async fn persist_chunks(&self, chapter: &Chapter, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            insert_chunk_tx(&mut tx, chapter, chunk).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn chunks_for_novel(&self, novel_id: i64) -> Result<Vec<StoredChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks JOIN chapters ON chunks.chapter_id = chapters.id \
             WHERE chunks.novel_id = ? ORDER BY chapters.chapter_number ASC, chunks.chunk_number ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(novel_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(row_to_chunk).collect())
    }

    pub async fn get_chunk(&self, chunk_id: ChunkId) -> Result<Option<StoredChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks JOIN chapters ON chunks.chapter_id = chapters.id \
             WHERE chunks.id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(row_to_chunk))
    }

    /// Batch lookup by id. Row order is not guaranteed; missing ids are absent
    /// from the map.
    pub async fn fetch_chunks_by_ids(
        &self,
        ids: &[ChunkId],
    ) -> Result<HashMap<ChunkId, StoredChunk>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks JOIN chapters ON chunks.chapter_id = chapters.id \
             WHERE chunks.id IN ("
        ));
        let mut separated = qb.separated(",");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows: Vec<SqliteRow> = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(row_to_chunk)
            .map(|chunk| (chunk.id, chunk))
            .collect())
    }
}

async fn insert_chunk_tx(
    tx: &mut Transaction<'_, Sqlite>,
    chapter: &Chapter,
    chunk: &Chunk,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (novel_id, chapter_id, chunk_number, content, token_count, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(chapter.novel_id)
    .bind(chapter.id)
    .bind(chunk.chunk_number)
    .bind(&chunk.content)
    .bind(chunk.token_length as i64)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn row_to_novel(row: SqliteRow) -> Novel {
    Novel {
        id: row.get("id"),
        title: row.get("title"),
        created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

fn row_to_chapter(row: SqliteRow) -> Chapter {
    Chapter {
        id: row.get("id"),
        novel_id: row.get("novel_id"),
        chapter_number: row.get("chapter_number"),
        title: row.get("title"),
        content: row.get("content"),
    }
}

fn row_to_chunk(row: SqliteRow) -> StoredChunk {
    StoredChunk {
        id: row.get("id"),
        novel_id: row.get("novel_id"),
        chapter_id: row.get("chapter_id"),
        chapter_number: row.get("chapter_number"),
        chunk_number: row.get("chunk_number"),
        content: row.get("content"),
        token_count: row.get("token_count"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("sqlite://{}", dir.path().join("test.sqlite3").display());
        let db = Database::connect(&dsn).await.unwrap();
        (dir, db)
    }

    fn source(number: i64, content: &str) -> ChapterSource {
        ChapterSource {
            chapter_number: number,
            title: Some(format!("Chapter {number}")),
            content: content.to_string(),
        }
    }

    fn chunk(number: i64, content: &str) -> Chunk {
        Chunk {
            chunk_number: number,
            content: content.to_string(),
            token_length: content.split_whitespace().count(),
            overlap_start: 0,
            seed: 0,
            end: 1,
        }
    }

    #[tokio::test]
    async fn upsert_novel_is_idempotent() {
        let (_dir, db) = open().await;
        let first = db.upsert_novel("Supreme Magus").await.unwrap();
        let second = db.upsert_novel("Supreme Magus").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_novels().await.unwrap().len(), 1);
        assert!(db.novel_by_title("Unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunks_round_trip_with_chapter_numbers() {
        let (_dir, db) = open().await;
        let novel = db.upsert_novel("Infinite Mana").await.unwrap();
        db.insert_chapters(novel.id, &[source(2, "two"), source(1, "one")])
            .await
            .unwrap();

        let chapters = db.chapters_for_novel(novel.id).await.unwrap();
        let numbers: Vec<i64> = chapters.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(
            db.chapter_numbers(novel.id).await.unwrap(),
            HashSet::from([1, 2])
        );

        db.persist_chunks(&chapters[1], &[chunk(1, "late a"), chunk(2, "late b")])
            .await
            .unwrap();
        db.persist_chunks(&chapters[0], &[chunk(1, "early")])
            .await
            .unwrap();

        let stored = db.chunks_for_novel(novel.id).await.unwrap();
        let order: Vec<(i64, i64)> = stored
            .iter()
            .map(|c| (c.chapter_number, c.chunk_number))
            .collect();
        assert_eq!(order, vec![(1, 1), (2, 1), (2, 2)]);
        assert_eq!(stored[1].token_count, 2);
        assert_eq!(db.count_chunks(novel.id).await.unwrap(), 3);

        let fetched = db.get_chunk(stored[0].id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "early");
    }

    #[tokio::test]
    async fn fetch_by_ids_omits_unknown_ids() {
        let (_dir, db) = open().await;
        let novel = db.upsert_novel("Infinite Mana").await.unwrap();
        db.insert_chapters(novel.id, &[source(1, "one")]).await.unwrap();
        let chapter = db.chapters_for_novel(novel.id).await.unwrap().remove(0);
        db.persist_chunks(&chapter, &[chunk(1, "a"), chunk(2, "b")])
            .await
            .unwrap();

        let ids: Vec<ChunkId> = db
            .chunks_for_novel(novel.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        let mut requested = ids.clone();
        requested.push(9_999);

        let rows = db.fetch_chunks_by_ids(&requested).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(ids.iter().all(|id| rows.contains_key(id)));
        assert!(db.fetch_chunks_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unchunked_chapters_lists_only_chapters_without_chunks() {
        let (_dir, db) = open().await;
        let novel = db.upsert_novel("Infinite Mana").await.unwrap();
        db.insert_chapters(novel.id, &[source(1, "one"), source(2, "two")])
            .await
            .unwrap();
        let first = db.chapters_for_novel(novel.id).await.unwrap().remove(0);
        db.persist_chunks(&first, &[chunk(1, "one")]).await.unwrap();
        db.insert_chapters(novel.id, &[source(3, "three")]).await.unwrap();

        let pending: Vec<i64> = db
            .unchunked_chapters(novel.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.chapter_number)
            .collect();
        assert_eq!(pending, vec![2, 3]);
    }

    #[tokio::test]
    async fn delete_chunks_only_touches_one_novel() {
        let (_dir, db) = open().await;
        let a = db.upsert_novel("A").await.unwrap();
        let b = db.upsert_novel("B").await.unwrap();
        db.insert_chapters(a.id, &[source(1, "x")]).await.unwrap();
        db.insert_chapters(b.id, &[source(1, "y")]).await.unwrap();
        let ca = db.chapters_for_novel(a.id).await.unwrap().remove(0);
        let cb = db.chapters_for_novel(b.id).await.unwrap().remove(0);
        db.persist_chunks(&ca, &[chunk(1, "x")]).await.unwrap();
        db.persist_chunks(&cb, &[chunk(1, "y")]).await.unwrap();

        db.delete_chunks(a.id).await.unwrap();
        assert_eq!(db.count_chunks(a.id).await.unwrap(), 0);
        assert_eq!(db.count_chunks(b.id).await.unwrap(), 1);
    }
}
