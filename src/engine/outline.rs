//! Bookmark tree retrieval

use log::debug;

use super::accelerated::{AcceleratedText, RawOutlineItem};
use super::capability::DocumentHandle;
use super::session::EngineSession;
use super::types::OutlineNode;

/// The document's bookmark forest; empty without a document or capability
pub fn outline<H: DocumentHandle>(
    session: &EngineSession<H>,
    accelerated: Option<&dyn AcceleratedText<H::Document>>,
) -> Vec<OutlineNode> {
    let Some(service) = accelerated else {
        return Vec::new();
    };

    let outcome = session.with_document(|_, open| match open.identity() {
        Some(path) => service.outline_file(path),
        None => service.outline_document(open.document()),
    });
    let Some(raw) = outcome else {
        return Vec::new();
    };

    match raw {
        Ok(items) => items.into_iter().map(into_node).collect(),
        Err(e) => {
            debug!("{}: outline unavailable: {e}", session.id());
            Vec::new()
        }
    }
}

fn into_node(item: RawOutlineItem) -> OutlineNode {
    OutlineNode {
        title: item.title.unwrap_or_default(),
        page_index: item.page_index,
        children: item.children.into_iter().map(into_node).collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::types::SessionId;
    use crate::test_utils::{ScriptedText, SpyHandle, write_pages};

    fn loaded() -> (EngineSession<SpyHandle>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_pages(dir.path(), "doc.pdf", &["a"]);
        let session = EngineSession::new(SessionId::new(1), SpyHandle::new());
        session.load(&path).unwrap();
        (session, dir)
    }

    fn item(title: Option<&str>, page_index: i32, children: Vec<RawOutlineItem>) -> RawOutlineItem {
        RawOutlineItem {
            title: title.map(str::to_string),
            page_index,
            children,
        }
    }

    #[test]
    fn document_without_bookmarks_has_empty_outline() {
        let (session, _dir) = loaded();
        let scripted = Arc::new(ScriptedText::new());
        assert!(outline(&session, Some(&*scripted)).is_empty());
    }

    #[test]
    fn tree_keeps_order_and_defaults_titles() {
        let (session, _dir) = loaded();
        let scripted = Arc::new(ScriptedText::new().with_outline(vec![
            item(
                Some("Part I"),
                0,
                vec![item(Some("Chapter 1"), 1, vec![]), item(None, 4, vec![])],
            ),
            item(Some("Part II"), 9, vec![]),
        ]));

        let nodes = outline(&session, Some(&*scripted));

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].title, "Part I");
        assert_eq!(nodes[0].children[0].title, "Chapter 1");
        assert_eq!(nodes[0].children[1].title, "");
        assert_eq!(nodes[0].children[1].page_index, 4);
        assert_eq!(nodes[1].title, "Part II");
        assert_eq!(nodes.iter().map(OutlineNode::subtree_len).sum::<usize>(), 4);
    }

    #[test]
    fn missing_capability_document_or_failure_is_empty() {
        let (session, _dir) = loaded();
        assert!(outline(&session, None).is_empty());

        let failing = Arc::new(ScriptedText::new().failing_outline());
        assert!(outline(&session, Some(&*failing)).is_empty());

        let empty = EngineSession::new(SessionId::new(2), SpyHandle::new());
        let scripted = Arc::new(ScriptedText::new().with_outline(vec![item(Some("x"), 0, vec![])]));
        assert!(outline(&empty, Some(&*scripted)).is_empty());
    }
}
