//! Internal domain modules for the CherryTree core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod archive;
pub mod blob_store;
pub mod config;
pub mod content;
pub mod delete;
pub mod document;
pub mod error;
pub mod node;
pub mod queue;
pub mod state_machine;
pub mod storage;
pub mod storage_control;
pub mod sync;
pub mod tmp;
pub mod tree;
pub mod widget;
pub mod xml_dom;

#[doc(inline)]
pub use archive::{ArchiveOutcome, Archiver, SevenZipArchiver, ZipAesArchiver};
#[doc(inline)]
pub use blob_store::BlobStore;
#[doc(inline)]
pub use config::{load_config, save_config, EngineConfig};
#[doc(inline)]
pub use content::{NodeContent, TextAttributes, TextRun};
#[doc(inline)]
pub use delete::DeleteResult;
#[doc(inline)]
pub use document::{AddPosition, Document};
#[doc(inline)]
pub use error::{CherryTreeError, Result};
#[doc(inline)]
pub use node::{NodeData, NodeId, Syntax};
#[doc(inline)]
pub use queue::{DiagnosticsQueue, DiagnosticsSender};
#[doc(inline)]
pub use state_machine::{HistoryEntry, StateMachine};
#[doc(inline)]
pub use storage::{
    CancelFlag, DocKind, DocType, ExportScope, MultiFileStorage, SqliteStorage, StorageBackend,
    XmlStorage,
};
#[doc(inline)]
pub use storage_control::StorageControl;
#[doc(inline)]
pub use sync::{NodeWriteState, SyncPending};
#[doc(inline)]
pub use tmp::TempManager;
#[doc(inline)]
pub use tree::{DuplicateIdPolicy, TreeStore, TreeSummary};
#[doc(inline)]
pub use widget::{
    AnchoredWidget, CodeBox, ImageAnchor, ImageEmbFile, ImageLatex, ImagePng, Justification,
    LatexRenderCache, LatexRenderer, RichCell, Table, TableCell, WidgetKind, WidgetState,
};
