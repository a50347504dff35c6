//! Core library for CherryTree: the hierarchical note tree, its storage
//! containers and per-node undo history.
//!
//! The primary entry point is [`Document`], which represents one open
//! document (`.ctd`, `.ctb`, `.ctz`, `.ctx` or a multi-file directory). All
//! mutations go through `Document` methods so that the sync-pending set and
//! the undo history follow the tree.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    archive::{ArchiveOutcome, Archiver, SevenZipArchiver, ZipAesArchiver},
    blob_store::BlobStore,
    config::{load_config, save_config, EngineConfig},
    content::{NodeContent, TextAttributes, TextRun},
    delete::DeleteResult,
    document::{AddPosition, Document},
    error::{CherryTreeError, Result},
    node::{NodeData, NodeId, Syntax},
    queue::{DiagnosticsQueue, DiagnosticsSender},
    state_machine::{HistoryEntry, StateMachine},
    storage::{
        CancelFlag, DocKind, DocType, ExportScope, MultiFileStorage, SqliteStorage,
        StorageBackend, XmlStorage,
    },
    storage_control::StorageControl,
    sync::{NodeWriteState, SyncPending},
    tmp::TempManager,
    tree::{DuplicateIdPolicy, TreeStore, TreeSummary},
    widget::{
        AnchoredWidget, CodeBox, ImageAnchor, ImageEmbFile, ImageLatex, ImagePng, Justification,
        LatexRenderCache, LatexRenderer, RichCell, Table, TableCell, WidgetKind, WidgetState,
    },
};
