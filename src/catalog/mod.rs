//! 目录存储协作方：实体、存储接口（内存 / SQLite）与向量记录同步

#[cfg(feature = "async-sqlite")]
pub mod sqlite;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteCatalog;
pub use store::{CatalogStore, InMemoryCatalog, RequestOutcome};
pub use sync::{EmbeddingSync, SyncOutcome};
pub use types::{
    AcquisitionRequest, Author, Book, BookDetails, BookDraft, BookInstance, CatalogFilter,
    CatalogItem, CopyStatus, EmbeddingRecord, Genre, NewAcquisitionRequest, RequestStatus,
};
