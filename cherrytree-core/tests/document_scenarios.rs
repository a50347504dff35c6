use cherrytree_core::{
    AddPosition, AnchoredWidget, ArchiveOutcome, Archiver, CancelFlag, CherryTreeError, CodeBox,
    Document, EngineConfig, ExportScope, ImageAnchor, ImageEmbFile, ImageLatex, ImagePng,
    Justification, NodeContent, NodeId, Result, RichCell, SyncPending, Syntax, Table,
    TextAttributes, WidgetKind, ZipAesArchiver,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> EngineConfig {
    EngineConfig {
        backup_copy: false,
        ..EngineConfig::default()
    }
}

fn widget(offset: i64, kind: WidgetKind) -> AnchoredWidget {
    AnchoredWidget::new(offset, Justification::Right, kind)
}

fn every_widget_content() -> NodeContent {
    let mut content = NodeContent::new();
    content.push_text("The quick brown fox ", TextAttributes::new());
    content.push_text(
        "jumps",
        [("weight".to_string(), "heavy".to_string())].into_iter().collect(),
    );
    content.insert_widget(widget(2, WidgetKind::ImagePng(ImagePng {
        raw_blob: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 255],
        link: "node 3".to_string(),
    })));
    content.insert_widget(widget(4, WidgetKind::ImageAnchor(ImageAnchor {
        anchor_name: "here".to_string(),
    })));
    content.insert_widget(widget(6, WidgetKind::ImageEmbFile(ImageEmbFile::new(
        "report.bin",
        (0u8..=255).collect(),
        1_650_000_000,
    ))));
    content.insert_widget(widget(8, WidgetKind::ImageLatex(ImageLatex::new("\\frac{a}{b}"))));
    content.insert_widget(widget(10, WidgetKind::CodeBox(CodeBox::new("let x = 1;\n", "rust"))));
    content.insert_widget(widget(12, WidgetKind::TableLight(Table::new(
        vec![
            vec!["name".to_string(), "qty".to_string()],
            vec!["apples".to_string(), "3".to_string()],
        ],
        60,
        vec![100, 0],
    ))));
    content.insert_widget(widget(14, WidgetKind::TableHeavy(Table::new(
        vec![
            vec![RichCell { text: "head".to_string() }],
            vec![RichCell { text: "body".to_string() }],
        ],
        70,
        Vec::new(),
    ))));
    content
}

/// A root rich-text node with every widget kind and a code child.
fn build_document(doc: &mut Document) -> (NodeId, NodeId) {
    let a = doc.add_node("A", Syntax::RichText, None, AddPosition::AsChild).unwrap();
    let b = doc
        .add_node("B", Syntax::Code("python".to_string()), Some(a), AddPosition::AsChild)
        .unwrap();
    doc.update_node(a, |data| {
        data.tags = "alpha beta".to_string();
        data.is_bold = true;
        data.foreground = Some("#ff0000".to_string());
    })
    .unwrap();
    doc.set_node_content(a, every_widget_content()).unwrap();
    doc.set_node_content(b, NodeContent::from_plain_text("print('hi')\n")).unwrap();
    doc.bookmarks_add(b);
    (a, b)
}

fn reopen(path: &Path, password: Option<&str>) -> Document {
    let mut doc = Document::open(path, password, Box::new(ZipAesArchiver), config()).unwrap();
    for id in doc.tree().iter_depth_first() {
        doc.select_node(id).unwrap();
    }
    doc
}

#[test]
fn every_container_round_trips_every_widget() {
    let dir = TempDir::new().unwrap();
    let targets = [
        ("doc.ctd", None),
        ("doc.ctb", None),
        ("doc_dir", None),
        ("doc.ctz", Some("pass")),
        ("doc.ctx", Some("pass")),
    ];
    for (name, password) in targets {
        let path = dir.path().join(name);
        let mut doc = Document::create(Box::new(ZipAesArchiver), config());
        let (a, b) = build_document(&mut doc);
        doc.save_as(&path, password, &ExportScope::All, &CancelFlag::new())
            .unwrap();

        let loaded = reopen(&path, password);
        assert_eq!(loaded.tree().iter_depth_first(), vec![a, b], "{name}");
        for id in [a, b] {
            assert_eq!(
                loaded.tree().get_node_from_id(id),
                doc.tree().get_node_from_id(id),
                "{name}: properties of {id}"
            );
            assert_eq!(
                loaded.tree().content(id),
                doc.tree().content(id),
                "{name}: content of {id}"
            );
        }
        assert_eq!(loaded.tree().bookmarks(), &[b], "{name}");
        assert_eq!(loaded.tree().summary().tables, 2, "{name}");
    }
}

#[test]
fn codebox_offset_survives_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.ctb");
    let mut doc = Document::create(Box::new(ZipAesArchiver), config());
    let a = doc.add_node("A", Syntax::RichText, None, AddPosition::AsChild).unwrap();
    let b = doc.add_node("B", Syntax::RichText, Some(a), AddPosition::AsChild).unwrap();
    let source = "fn main() {\n\tprintln!(\"ünïcödé\");\n}\n";
    let mut content = NodeContent::from_plain_text("0123456789 after the box");
    content.insert_widget(AnchoredWidget::new(
        10,
        Justification::Left,
        WidgetKind::CodeBox(CodeBox::new(source, "rust")),
    ));
    doc.set_node_content(b, content).unwrap();
    doc.save_as(&path, None, &ExportScope::All, &CancelFlag::new())
        .unwrap();

    let loaded = reopen(&path, None);
    let widgets = loaded.tree().content(b).unwrap().widgets();
    assert_eq!(widgets.len(), 1);
    assert_eq!(widgets[0].char_offset, 10);
    match &widgets[0].kind {
        WidgetKind::CodeBox(codebox) => assert_eq!(codebox.text.as_bytes(), source.as_bytes()),
        other => panic!("expected a codebox, got {other:?}"),
    }
}

#[test]
fn cascade_delete_purges_history_and_retires_ids() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cascade.ctb");
    let mut doc = Document::create(Box::new(ZipAesArchiver), config());
    let a = doc.add_node("A", Syntax::RichText, None, AddPosition::AsChild).unwrap();
    let b = doc.add_node("B", Syntax::RichText, Some(a), AddPosition::AsChild).unwrap();
    doc.save_as(&path, None, &ExportScope::All, &CancelFlag::new())
        .unwrap();

    doc.select_node(b).unwrap();
    doc.text_variation(b, "\n");
    doc.set_node_content(b, NodeContent::from_plain_text("edited\n")).unwrap();
    doc.text_variation(b, "\n");
    assert!(doc.states().history_len(b) >= 2);

    let result = doc.delete_node(a).unwrap();
    assert_eq!(result.deleted_ids, vec![b, a]);
    assert!(!doc.tree().contains(b));
    assert_eq!(doc.states().history_len(b), 0);
    assert!(!doc.states().visited_nodes().contains(&b));
    doc.save(false, &CancelFlag::new()).unwrap();

    let mut loaded = Document::open(&path, None, Box::new(ZipAesArchiver), config()).unwrap();
    assert!(loaded.tree().is_empty());
    let fresh = loaded
        .add_node("C", Syntax::RichText, None, AddPosition::AsChild)
        .unwrap();
    assert!(fresh > b && fresh > a);
}

/// Archives through [`ZipAesArchiver`] until told to fail.
struct FlakyArchiver {
    fail: Arc<AtomicBool>,
}

impl Archiver for FlakyArchiver {
    fn extract(&self, archive: &Path, password: &str, out_dir: &Path) -> Result<ArchiveOutcome> {
        ZipAesArchiver.extract(archive, password, out_dir)
    }

    fn archive(&self, input: &Path, password: &str, output: &Path) -> Result<ArchiveOutcome> {
        if self.fail.load(Ordering::SeqCst) {
            return Ok(ArchiveOutcome {
                code: 2,
                stderr: "simulated failure".to_string(),
            });
        }
        ZipAesArchiver.archive(input, password, output)
    }
}

#[test]
fn failed_archive_keeps_original_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.ctx");
    let fail = Arc::new(AtomicBool::new(false));
    let archiver = FlakyArchiver { fail: fail.clone() };
    let mut doc = Document::create(Box::new(archiver), config());
    let a = doc.add_node("A", Syntax::RichText, None, AddPosition::AsChild).unwrap();
    doc.set_node_content(a, NodeContent::from_plain_text("original")).unwrap();
    doc.save_as(&path, Some("pw"), &ExportScope::All, &CancelFlag::new())
        .unwrap();

    fail.store(true, Ordering::SeqCst);
    doc.set_node_content(a, NodeContent::from_plain_text("half written")).unwrap();
    let err = doc.save(false, &CancelFlag::new()).unwrap_err();
    assert!(matches!(err, CherryTreeError::ArchiveTool { code: 2, .. }));
    assert!(doc.is_dirty());

    let loaded = reopen(&path, Some("pw"));
    assert_eq!(loaded.tree().content(a).unwrap().text(), "original");

    fail.store(false, Ordering::SeqCst);
    doc.save(false, &CancelFlag::new()).unwrap();
    let loaded = reopen(&path, Some("pw"));
    assert_eq!(loaded.tree().content(a).unwrap().text(), "half written");
}

#[test]
fn import_repairs_colliding_ids() {
    let dir = TempDir::new().unwrap();
    let other = dir.path().join("other.ctd");
    let mut source = Document::create(Box::new(ZipAesArchiver), config());
    let s = source.add_node("imported", Syntax::PlainText, None, AddPosition::AsChild).unwrap();
    source.set_node_content(s, NodeContent::from_plain_text("from elsewhere")).unwrap();
    source
        .save_as(&other, None, &ExportScope::All, &CancelFlag::new())
        .unwrap();

    let mut doc = Document::create(Box::new(ZipAesArchiver), config());
    let host = doc.add_node("host", Syntax::RichText, None, AddPosition::AsChild).unwrap();
    assert_eq!(host, s);
    let imported = doc.import_from(&other, None, Some(host)).unwrap();
    assert_eq!(imported.len(), 1);
    assert_ne!(imported[0], host);
    assert_eq!(doc.tree().get_node_from_id(host).unwrap().name, "host");
    assert_eq!(doc.tree().content(imported[0]).unwrap().text(), "from elsewhere");
}

#[test]
fn ids_stay_unique_and_pending_sets_stay_disjoint() {
    let mut doc = Document::create(Box::new(ZipAesArchiver), config());
    let mut issued = HashSet::new();
    let mut state: u64 = 0x2545_f491;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for _ in 0..300 {
        let live = doc.tree().iter_depth_first();
        let pick = |r: u64| live.get((r as usize) % live.len().max(1)).copied();
        match next() % 4 {
            0 | 1 => {
                let id = doc
                    .add_node("n", Syntax::RichText, pick(next()), AddPosition::AsChild)
                    .unwrap();
                assert!(issued.insert(id), "id {id} issued twice");
            }
            2 => {
                if let Some(id) = pick(next()) {
                    doc.delete_node(id).unwrap();
                }
            }
            _ => {
                if let (Some(id), Some(target)) = (pick(next()), pick(next())) {
                    let _ = doc.move_node(id, Some(target), 0);
                }
            }
        }
        let live = doc.tree().iter_depth_first();
        assert_eq!(live.len(), live.iter().collect::<HashSet<_>>().len());
        assert_disjoint(doc.storage().pending());
    }
}

fn assert_disjoint(pending: &SyncPending) {
    for id in pending.nodes_to_write().keys() {
        assert!(!pending.nodes_to_rm().contains(id), "{id} both written and removed");
    }
}
