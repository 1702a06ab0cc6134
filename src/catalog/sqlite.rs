//! SQLite 目录存储（sqlx）
//!
//! 需要启用 `async-sqlite` feature。向量以 f32 小端字节 BLOB 存储，相似度在进程内计算；
//! 过滤检索使用 SQLite 的 LIKE（ASCII 不区分大小写）。

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::catalog::store::{new_id, CatalogStore, RequestOutcome};
use crate::catalog::types::{
    AcquisitionRequest, Author, Book, BookDetails, BookDraft, BookInstance, CatalogFilter,
    CatalogItem, CopyStatus, EmbeddingRecord, Genre, NewAcquisitionRequest, RequestStatus,
};
use crate::core::StoreError;
use crate::retrieval::{rank_by_distance, DistanceMetric};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn like_pattern(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"))
}

fn item_from_row(row: &SqliteRow) -> CatalogItem {
    CatalogItem {
        id: row.get("book_id"),
        title: row.get("title"),
        author: row.get("author"),
        genre: row.get("genre"),
        summary: row.get("summary"),
    }
}

fn request_from_row(row: &SqliteRow) -> Result<AcquisitionRequest, StoreError> {
    let status: String = row.get("status");
    Ok(AcquisitionRequest {
        id: row.get("id"),
        title: row.get("title"),
        author: row.get("author"),
        genre: row.get("genre"),
        notes: row.get("notes"),
        requested_by: row.get("requested_by"),
        status: RequestStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("request status {status}")))?,
        created_at: row.get("created_at"),
    })
}

/// SQLite 目录存储
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(backend)?;
        let store = Self { pool };
        store.init_tables().await.map_err(backend)?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS authors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS genres (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author_id TEXT NOT NULL,
                genre_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                seq INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS book_instances (
                id TEXT PRIMARY KEY,
                book_id TEXT NOT NULL,
                imprint TEXT NOT NULL,
                status TEXT NOT NULL,
                due_date TEXT
            )",
            "CREATE TABLE IF NOT EXISTS book_embeddings (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id TEXT NOT NULL UNIQUE,
                embedding BLOB NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                genre TEXT NOT NULL,
                summary TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS book_requests (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT,
                genre TEXT,
                notes TEXT,
                requested_by TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            // 查重键：书名 + 作者（不区分大小写）
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_title_author
                ON book_requests (lower(trim(title)), lower(trim(coalesce(author, ''))))",
            "CREATE INDEX IF NOT EXISTS idx_instances_book ON book_instances(book_id)",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn find_request(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<AcquisitionRequest>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM book_requests
             WHERE lower(trim(title)) = lower(trim(?))
               AND lower(trim(coalesce(author, ''))) = lower(trim(?))",
        )
        .bind(title)
        .bind(author.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(request_from_row).transpose()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn add_author(&self, name: &str) -> Result<Author, StoreError> {
        let author = Author {
            id: new_id(),
            name: name.to_string(),
        };
        sqlx::query("INSERT INTO authors (id, name) VALUES (?, ?)")
            .bind(&author.id)
            .bind(&author.name)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(author)
    }

    async fn rename_author(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE authors SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("author {id}")));
        }
        Ok(())
    }

    async fn add_genre(&self, name: &str) -> Result<Genre, StoreError> {
        let genre = Genre {
            id: new_id(),
            name: name.to_string(),
        };
        sqlx::query("INSERT INTO genres (id, name) VALUES (?, ?)")
            .bind(&genre.id)
            .bind(&genre.name)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(genre)
    }

    async fn rename_genre(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE genres SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("genre {id}")));
        }
        Ok(())
    }

    async fn add_book(&self, draft: BookDraft) -> Result<Book, StoreError> {
        let book = Book {
            id: new_id(),
            title: draft.title,
            author_id: draft.author_id,
            genre_id: draft.genre_id,
            summary: draft.summary,
        };
        sqlx::query(
            "INSERT INTO books (id, title, author_id, genre_id, summary, seq)
             VALUES (?, ?, ?, ?, ?, (SELECT coalesce(max(seq), 0) + 1 FROM books))",
        )
        .bind(&book.id)
        .bind(&book.title)
        .bind(&book.author_id)
        .bind(&book.genre_id)
        .bind(&book.summary)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(book)
    }

    async fn update_book(&self, id: &str, draft: BookDraft) -> Result<Book, StoreError> {
        let result = sqlx::query(
            "UPDATE books SET title = ?, author_id = ?, genre_id = ?, summary = ? WHERE id = ?",
        )
        .bind(&draft.title)
        .bind(&draft.author_id)
        .bind(&draft.genre_id)
        .bind(&draft.summary)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("book {id}")));
        }
        Ok(Book {
            id: id.to_string(),
            title: draft.title,
            author_id: draft.author_id,
            genre_id: draft.genre_id,
            summary: draft.summary,
        })
    }

    async fn delete_book(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM book_instances WHERE book_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM book_embeddings WHERE book_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let result = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn book_details(&self, id: &str) -> Result<Option<BookDetails>, StoreError> {
        let row = sqlx::query(
            "SELECT b.id, b.title, b.author_id, b.genre_id, b.summary,
                    coalesce(a.name, '') AS author, coalesce(g.name, '') AS genre
             FROM books b
             LEFT JOIN authors a ON a.id = b.author_id
             LEFT JOIN genres g ON g.id = b.genre_id
             WHERE b.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|row| BookDetails {
            book: Book {
                id: row.get("id"),
                title: row.get("title"),
                author_id: row.get("author_id"),
                genre_id: row.get("genre_id"),
                summary: row.get("summary"),
            },
            author: row.get("author"),
            genre: row.get("genre"),
        }))
    }

    async fn find_book_by_title(&self, fragment: &str) -> Result<Option<Book>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, author_id, genre_id, summary FROM books
             WHERE title LIKE ? ORDER BY seq ASC LIMIT 1",
        )
        .bind(format!("%{}%", fragment.trim()))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|row| Book {
            id: row.get("id"),
            title: row.get("title"),
            author_id: row.get("author_id"),
            genre_id: row.get("genre_id"),
            summary: row.get("summary"),
        }))
    }

    async fn book_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT id FROM books ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    async fn add_instance(
        &self,
        book_id: &str,
        imprint: &str,
        status: CopyStatus,
        due_date: Option<&str>,
    ) -> Result<BookInstance, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM books WHERE id = ?")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound(format!("book {book_id}")));
        }
        let instance = BookInstance {
            id: new_id(),
            book_id: book_id.to_string(),
            imprint: imprint.to_string(),
            status,
            due_date: due_date.map(String::from),
        };
        sqlx::query(
            "INSERT INTO book_instances (id, book_id, imprint, status, due_date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&instance.id)
        .bind(&instance.book_id)
        .bind(&instance.imprint)
        .bind(instance.status.as_str())
        .bind(&instance.due_date)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(instance)
    }

    async fn instances_for(&self, book_id: &str) -> Result<Vec<BookInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, book_id, imprint, status, due_date FROM book_instances
             WHERE book_id = ?
             ORDER BY status ASC, due_date IS NULL, due_date ASC",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(BookInstance {
                    id: row.get("id"),
                    book_id: row.get("book_id"),
                    imprint: row.get("imprint"),
                    status: CopyStatus::parse(&status)
                        .ok_or_else(|| StoreError::Corrupt(format!("copy status {status}")))?,
                    due_date: row.get("due_date"),
                })
            })
            .collect()
    }

    async fn upsert_embedding(&self, record: EmbeddingRecord) -> Result<(), StoreError> {
        // ON CONFLICT 保留原 seq，即保留插入顺序
        sqlx::query(
            "INSERT INTO book_embeddings (book_id, embedding, title, author, genre, summary)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(book_id) DO UPDATE SET
                embedding = excluded.embedding,
                title = excluded.title,
                author = excluded.author,
                genre = excluded.genre,
                summary = excluded.summary",
        )
        .bind(&record.book_id)
        .bind(encode_vector(&record.embedding))
        .bind(&record.title)
        .bind(&record.author)
        .bind(&record.genre)
        .bind(&record.summary)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_embedding(&self, book_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM book_embeddings WHERE book_id = ?")
            .bind(book_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_embedding_author(&self, author_id: &str, name: &str) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE book_embeddings SET author = ?
             WHERE book_id IN (SELECT id FROM books WHERE author_id = ?)",
        )
        .bind(name)
        .bind(author_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() as usize)
    }

    async fn set_embedding_genre(&self, genre_id: &str, name: &str) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE book_embeddings SET genre = ?
             WHERE book_id IN (SELECT id FROM books WHERE genre_id = ?)",
        )
        .bind(name)
        .bind(genre_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() as usize)
    }

    async fn embedding_count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT count(*) AS n FROM book_embeddings")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }

    async fn filter_embeddings(
        &self,
        filter: &CatalogFilter,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let title = like_pattern(&filter.title);
        let author = like_pattern(&filter.author);
        let genre = like_pattern(&filter.genre);
        let rows = sqlx::query(
            "SELECT book_id, title, author, genre, summary FROM book_embeddings
             WHERE (? IS NULL OR title LIKE ?)
               AND (? IS NULL OR author LIKE ?)
               AND (? IS NULL OR genre LIKE ?)
             ORDER BY seq ASC
             LIMIT ?",
        )
        .bind(&title)
        .bind(&title)
        .bind(&author)
        .bind(&author)
        .bind(&genre)
        .bind(&genre)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.iter().map(item_from_row).collect())
    }

    async fn nearest(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
    ) -> Result<Vec<(CatalogItem, f32)>, StoreError> {
        let rows = sqlx::query(
            "SELECT book_id, embedding, title, author, genre, summary FROM book_embeddings
             ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            candidates.push((item_from_row(row), decode_vector(&blob)?));
        }
        let ranked = rank_by_distance(
            query,
            candidates.iter().map(|(item, v)| (item, v.as_slice())),
            metric,
            k,
        );
        Ok(ranked.into_iter().map(|(item, d)| (item.clone(), d)).collect())
    }

    async fn record_request(&self, request: NewAcquisitionRequest) -> Result<RequestOutcome, StoreError> {
        let id = new_id();
        // 唯一索引保证并发下只会插入一条
        let result = sqlx::query(
            "INSERT OR IGNORE INTO book_requests
                (id, title, author, genre, notes, requested_by, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.title)
        .bind(&request.author)
        .bind(&request.genre)
        .bind(&request.notes)
        .bind(&request.requested_by)
        .bind(RequestStatus::Pending.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let stored = self
            .find_request(&request.title, request.author.as_deref())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("request {}", request.title)))?;
        if result.rows_affected() > 0 {
            Ok(RequestOutcome::Created(stored))
        } else {
            Ok(RequestOutcome::Existing(stored))
        }
    }

    async fn list_requests(&self) -> Result<Vec<AcquisitionRequest>, StoreError> {
        let rows = sqlx::query("SELECT * FROM book_requests ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(request_from_row).collect()
    }
}
