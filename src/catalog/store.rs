//! 目录存储接口与内存实现
//!
//! CatalogStore 是核心消费的存储协作方：图书/作者/类型/副本的最小读写、向量记录、采购请求。
//! 删除图书时同时删除其向量记录与副本，保证没有悬空向量。

use std::sync::RwLock;

use async_trait::async_trait;

use crate::catalog::types::{
    same_request, AcquisitionRequest, Author, Book, BookDetails, BookDraft, BookInstance,
    CatalogFilter, CatalogItem, CopyStatus, EmbeddingRecord, Genre, NewAcquisitionRequest,
    RequestStatus,
};
use crate::core::StoreError;
use crate::retrieval::{rank_by_distance, DistanceMetric};

/// 采购请求写入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Created(AcquisitionRequest),
    /// 书名 + 作者已存在，返回原记录，不新增
    Existing(AcquisitionRequest),
}

/// 目录存储协作方
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn add_author(&self, name: &str) -> Result<Author, StoreError>;
    async fn rename_author(&self, id: &str, name: &str) -> Result<(), StoreError>;
    async fn add_genre(&self, name: &str) -> Result<Genre, StoreError>;
    async fn rename_genre(&self, id: &str, name: &str) -> Result<(), StoreError>;

    async fn add_book(&self, draft: BookDraft) -> Result<Book, StoreError>;
    async fn update_book(&self, id: &str, draft: BookDraft) -> Result<Book, StoreError>;
    /// 删除图书及其副本与向量记录；不存在时返回 false
    async fn delete_book(&self, id: &str) -> Result<bool, StoreError>;
    async fn book_details(&self, id: &str) -> Result<Option<BookDetails>, StoreError>;
    /// 不区分大小写的书名子串匹配，返回第一条
    async fn find_book_by_title(&self, fragment: &str) -> Result<Option<Book>, StoreError>;
    async fn book_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn add_instance(
        &self,
        book_id: &str,
        imprint: &str,
        status: CopyStatus,
        due_date: Option<&str>,
    ) -> Result<BookInstance, StoreError>;
    /// 按状态、到期日排序（无到期日排后）
    async fn instances_for(&self, book_id: &str) -> Result<Vec<BookInstance>, StoreError>;

    async fn upsert_embedding(&self, record: EmbeddingRecord) -> Result<(), StoreError>;
    async fn delete_embedding(&self, book_id: &str) -> Result<bool, StoreError>;
    /// 更新某作者所有图书向量记录中的作者名，返回更新条数
    async fn set_embedding_author(&self, author_id: &str, name: &str) -> Result<usize, StoreError>;
    async fn set_embedding_genre(&self, genre_id: &str, name: &str) -> Result<usize, StoreError>;
    async fn embedding_count(&self) -> Result<usize, StoreError>;
    async fn filter_embeddings(
        &self,
        filter: &CatalogFilter,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError>;
    /// 返回 (条目, 距离)，距离升序，并列按插入顺序
    async fn nearest(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
    ) -> Result<Vec<(CatalogItem, f32)>, StoreError>;

    /// 原子地查重并写入采购请求
    async fn record_request(&self, request: NewAcquisitionRequest) -> Result<RequestOutcome, StoreError>;
    async fn list_requests(&self) -> Result<Vec<AcquisitionRequest>, StoreError>;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 副本排序：状态名升序，再按到期日升序，无到期日在后
pub(crate) fn sort_instances(instances: &mut [BookInstance]) {
    instances.sort_by(|a, b| {
        a.status
            .as_str()
            .cmp(b.status.as_str())
            .then_with(|| match (&a.due_date, &b.due_date) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });
}

#[derive(Default)]
struct CatalogState {
    authors: Vec<Author>,
    genres: Vec<Genre>,
    books: Vec<Book>,
    instances: Vec<BookInstance>,
    /// 插入顺序即并列时的排序顺序
    embeddings: Vec<EmbeddingRecord>,
    requests: Vec<AcquisitionRequest>,
}

impl CatalogState {
    fn author_name(&self, id: &str) -> String {
        self.authors
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.name.clone())
            .unwrap_or_default()
    }

    fn genre_name(&self, id: &str) -> String {
        self.genres
            .iter()
            .find(|g| g.id == id)
            .map(|g| g.name.clone())
            .unwrap_or_default()
    }
}

/// 内存目录存储（测试、演示与无数据库运行）
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn add_author(&self, name: &str) -> Result<Author, StoreError> {
        let author = Author {
            id: new_id(),
            name: name.to_string(),
        };
        self.write().authors.push(author.clone());
        Ok(author)
    }

    async fn rename_author(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.write();
        let author = state
            .authors
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("author {id}")))?;
        author.name = name.to_string();
        Ok(())
    }

    async fn add_genre(&self, name: &str) -> Result<Genre, StoreError> {
        let genre = Genre {
            id: new_id(),
            name: name.to_string(),
        };
        self.write().genres.push(genre.clone());
        Ok(genre)
    }

    async fn rename_genre(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.write();
        let genre = state
            .genres
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("genre {id}")))?;
        genre.name = name.to_string();
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
        self.write().books.push(book.clone());
        Ok(book)
    }

    async fn update_book(&self, id: &str, draft: BookDraft) -> Result<Book, StoreError> {
        let mut state = self.write();
        let book = state
            .books
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("book {id}")))?;
        book.title = draft.title;
        book.author_id = draft.author_id;
        book.genre_id = draft.genre_id;
        book.summary = draft.summary;
        Ok(book.clone())
    }

    async fn delete_book(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.write();
        let before = state.books.len();
        state.books.retain(|b| b.id != id);
        let removed = state.books.len() != before;
        state.instances.retain(|i| i.book_id != id);
        state.embeddings.retain(|e| e.book_id != id);
        Ok(removed)
    }

    async fn book_details(&self, id: &str) -> Result<Option<BookDetails>, StoreError> {
        let state = self.read();
        Ok(state.books.iter().find(|b| b.id == id).map(|b| BookDetails {
            book: b.clone(),
            author: state.author_name(&b.author_id),
            genre: state.genre_name(&b.genre_id),
        }))
    }

    async fn find_book_by_title(&self, fragment: &str) -> Result<Option<Book>, StoreError> {
        let needle = fragment.trim().to_lowercase();
        Ok(self
            .read()
            .books
            .iter()
            .find(|b| b.title.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn book_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read().books.iter().map(|b| b.id.clone()).collect())
    }

    async fn add_instance(
        &self,
        book_id: &str,
        imprint: &str,
        status: CopyStatus,
        due_date: Option<&str>,
    ) -> Result<BookInstance, StoreError> {
        let mut state = self.write();
        if !state.books.iter().any(|b| b.id == book_id) {
            return Err(StoreError::NotFound(format!("book {book_id}")));
        }
        let instance = BookInstance {
            id: new_id(),
            book_id: book_id.to_string(),
            imprint: imprint.to_string(),
            status,
            due_date: due_date.map(String::from),
        };
        state.instances.push(instance.clone());
        Ok(instance)
    }

    async fn instances_for(&self, book_id: &str) -> Result<Vec<BookInstance>, StoreError> {
        let mut out: Vec<BookInstance> = self
            .read()
            .instances
            .iter()
            .filter(|i| i.book_id == book_id)
            .cloned()
            .collect();
        sort_instances(&mut out);
        Ok(out)
    }

    async fn upsert_embedding(&self, record: EmbeddingRecord) -> Result<(), StoreError> {
        let mut state = self.write();
        match state
            .embeddings
            .iter_mut()
            .find(|e| e.book_id == record.book_id)
        {
            Some(existing) => *existing = record,
            None => state.embeddings.push(record),
        }
        Ok(())
    }

    async fn delete_embedding(&self, book_id: &str) -> Result<bool, StoreError> {
        let mut state = self.write();
        let before = state.embeddings.len();
        state.embeddings.retain(|e| e.book_id != book_id);
        Ok(state.embeddings.len() != before)
    }

    async fn set_embedding_author(&self, author_id: &str, name: &str) -> Result<usize, StoreError> {
        let mut state = self.write();
        let ids: Vec<String> = state
            .books
            .iter()
            .filter(|b| b.author_id == author_id)
            .map(|b| b.id.clone())
            .collect();
        let mut n = 0;
        for e in state.embeddings.iter_mut().filter(|e| ids.contains(&e.book_id)) {
            e.author = name.to_string();
            n += 1;
        }
        Ok(n)
    }

    async fn set_embedding_genre(&self, genre_id: &str, name: &str) -> Result<usize, StoreError> {
        let mut state = self.write();
        let ids: Vec<String> = state
            .books
            .iter()
            .filter(|b| b.genre_id == genre_id)
            .map(|b| b.id.clone())
            .collect();
        let mut n = 0;
        for e in state.embeddings.iter_mut().filter(|e| ids.contains(&e.book_id)) {
            e.genre = name.to_string();
            n += 1;
        }
        Ok(n)
    }

    async fn embedding_count(&self) -> Result<usize, StoreError> {
        Ok(self.read().embeddings.len())
    }

    async fn filter_embeddings(
        &self,
        filter: &CatalogFilter,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        Ok(self
            .read()
            .embeddings
            .iter()
            .filter(|e| filter.matches(e))
            .take(limit)
            .map(CatalogItem::from)
            .collect())
    }

    async fn nearest(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
    ) -> Result<Vec<(CatalogItem, f32)>, StoreError> {
        let state = self.read();
        let ranked = rank_by_distance(
            query,
            state.embeddings.iter().map(|e| (e, e.embedding.as_slice())),
            metric,
            k,
        );
        Ok(ranked
            .into_iter()
            .map(|(e, d)| (CatalogItem::from(e), d))
            .collect())
    }

    async fn record_request(&self, request: NewAcquisitionRequest) -> Result<RequestOutcome, StoreError> {
        let mut state = self.write();
        if let Some(existing) = state
            .requests
            .iter()
            .find(|r| same_request(r, &request.title, request.author.as_deref()))
        {
            return Ok(RequestOutcome::Existing(existing.clone()));
        }
        let created = AcquisitionRequest {
            id: new_id(),
            title: request.title,
            author: request.author,
            genre: request.genre,
            notes: request.notes,
            requested_by: request.requested_by,
            status: RequestStatus::Pending,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        state.requests.push(created.clone());
        Ok(RequestOutcome::Created(created))
    }

    async fn list_requests(&self) -> Result<Vec<AcquisitionRequest>, StoreError> {
        Ok(self.read().requests.clone())
    }
}
