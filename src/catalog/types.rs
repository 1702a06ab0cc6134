//! 目录实体与向量记录

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author_id: String,
    pub genre_id: String,
    pub summary: String,
}

/// 新建 / 更新图书的字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDraft {
    pub title: String,
    pub author_id: String,
    pub genre_id: String,
    pub summary: String,
}

/// 图书及其作者、类型名称（用于生成嵌入文本）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDetails {
    pub book: Book,
    pub author: String,
    pub genre: String,
}

impl BookDetails {
    /// 嵌入文本格式固定，保证重建索引结果一致
    pub fn embedding_text(&self) -> String {
        format!(
            "Title: {}\nAuthor: {}\nGenre: {}\nSummary: {}",
            self.book.title, self.author, self.genre, self.book.summary
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    Available,
    Maintenance,
    Loaned,
    Reserved,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Available => "Available",
            CopyStatus::Maintenance => "Maintenance",
            CopyStatus::Loaned => "Loaned",
            CopyStatus::Reserved => "Reserved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Available" => Some(CopyStatus::Available),
            "Maintenance" => Some(CopyStatus::Maintenance),
            "Loaned" => Some(CopyStatus::Loaned),
            "Reserved" => Some(CopyStatus::Reserved),
            _ => None,
        }
    }
}

/// 实体副本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInstance {
    pub id: String,
    pub book_id: String,
    pub imprint: String,
    pub status: CopyStatus,
    /// YYYY-MM-DD
    pub due_date: Option<String>,
}

/// 向量记录：book_id 唯一，附带反范式化的元数据，仅用于相似度排序与过滤检索
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub book_id: String,
    pub embedding: Vec<f32>,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub summary: String,
}

/// 过滤检索 / 相似度检索返回给模型的条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub summary: String,
}

impl From<&EmbeddingRecord> for CatalogItem {
    fn from(r: &EmbeddingRecord) -> Self {
        Self {
            id: r.book_id.clone(),
            title: r.title.clone(),
            author: r.author.clone(),
            genre: r.genre.clone(),
            summary: r.summary.clone(),
        }
    }
}

/// 过滤条件：已提供的字段按不区分大小写的子串匹配，彼此 AND
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
}

impl CatalogFilter {
    pub fn is_empty(&self) -> bool {
        [&self.title, &self.author, &self.genre]
            .iter()
            .all(|f| f.as_deref().map(str::trim).unwrap_or("").is_empty())
    }

    pub fn matches(&self, record: &EmbeddingRecord) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            match needle.as_deref().map(str::trim) {
                Some(n) if !n.is_empty() => haystack.to_lowercase().contains(&n.to_lowercase()),
                _ => true,
            }
        }
        contains(&record.title, &self.title)
            && contains(&record.author, &self.author)
            && contains(&record.genre, &self.genre)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Ordered,
    Rejected,
    Fulfilled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Ordered => "ordered",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Fulfilled => "fulfilled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "ordered" => Some(RequestStatus::Ordered),
            "rejected" => Some(RequestStatus::Rejected),
            "fulfilled" => Some(RequestStatus::Fulfilled),
            _ => None,
        }
    }
}

/// 采购请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionRequest {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub notes: Option<String>,
    pub requested_by: String,
    pub status: RequestStatus,
    /// RFC 3339
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAcquisitionRequest {
    pub title: String,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub notes: Option<String>,
    pub requested_by: String,
}

/// 查重键：书名与作者均按不区分大小写的完全相等比较，作者缺省视为空串
pub fn same_request(existing: &AcquisitionRequest, title: &str, author: Option<&str>) -> bool {
    let norm = |s: &str| s.trim().to_lowercase();
    norm(&existing.title) == norm(title)
        && norm(existing.author.as_deref().unwrap_or("")) == norm(author.unwrap_or(""))
}
