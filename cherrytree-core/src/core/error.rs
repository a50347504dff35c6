//! Error types for the CherryTree core library.

use thiserror::Error;

/// All errors that can occur within the CherryTree core library.
#[derive(Debug, Error)]
pub enum CherryTreeError {
    /// A SQLite statement failed to prepare or execute.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Document content could not be parsed, even after the recovery retries.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A node was appended with an id already present in the tree.
    #[error("Duplicate node id: {0}")]
    DuplicateId(i64),

    /// A content-addressed blob referenced by a node is absent from the blob directory.
    #[error("Missing blob: {0}")]
    MissingBlob(String),

    /// The external archiver exited with a non-zero status.
    #[error("Archiver failed with exit code {code}: {stderr}")]
    ArchiveTool { code: i32, stderr: String },

    /// An anchored widget row could not be written; the save pass was aborted.
    #[error("Failed to write widgets of node {0}")]
    WidgetWrite(i64),

    /// A bounded queue rejected a message because it is full.
    #[error("Queue capacity exhausted ({0} slots)")]
    Capacity(usize),

    /// A node id was requested that does not exist in the tree.
    #[error("Node not found: {0}")]
    NodeNotFound(i64),

    /// A move would create a cycle or is otherwise invalid.
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// The opened path is not a recognised CherryTree document.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The backend does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A save was cancelled before the result was swapped in.
    #[error("Operation cancelled")]
    Cancelled,

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// XML could not be read or written.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The engine configuration could not be (de)serialised.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The in-process zip archiver failed.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Convenience alias that pins the error type to [`CherryTreeError`].
pub type Result<T> = std::result::Result<T, CherryTreeError>;

impl From<quick_xml::events::attributes::AttrError> for CherryTreeError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(quick_xml::Error::from(e))
    }
}

impl CherryTreeError {
    /// Returns a short, human-readable message suitable for display to the end user.
    ///
    /// Messages never expose table or column names.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(_) => "Failed to save the document database".to_string(),
            Self::Parse(_) | Self::Xml(_) => "The document is damaged and could not be read".to_string(),
            Self::DuplicateId(_) => "The document contains repeated node ids".to_string(),
            Self::MissingBlob(_) => "An attachment of this document is missing".to_string(),
            Self::ArchiveTool { .. } => "Wrong password or corrupt archive".to_string(),
            Self::WidgetWrite(_) => "Failed to save the document database".to_string(),
            Self::Capacity(_) => "Too many pending messages".to_string(),
            Self::NodeNotFound(_) => "Node no longer exists".to_string(),
            Self::InvalidMove(msg) => msg.clone(),
            Self::InvalidDocument(_) => "Could not open document file".to_string(),
            Self::UnsupportedOperation(msg) => msg.clone(),
            Self::Cancelled => "Operation cancelled".to_string(),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Settings format error: {e}"),
            Self::Zip(_) => "Wrong password or corrupt archive".to_string(),
        }
    }
}
