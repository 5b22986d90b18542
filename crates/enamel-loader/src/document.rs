//! In-memory model of the page's style elements

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A `<style>` element in the document head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleElement {
    /// Element id (unique within the document)
    pub id: String,
    /// Stylesheet text
    pub css: String,
}

impl StyleElement {
    /// Create a style element
    pub fn new(id: impl Into<String>, css: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            css: css.into(),
        }
    }

    /// Render as markup
    pub fn to_html(&self) -> String {
        format!("<style id=\"{}\">{}</style>", self.id, self.css)
    }
}

/// Ordered style elements of a document head
///
/// Element ids are unique: inserting an id that is already present is a
/// no-op and reports `false`.
#[derive(Debug, Default)]
pub struct StyleDocument {
    head: RwLock<Vec<StyleElement>>,
}

impl StyleDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document with pre-existing style elements
    pub fn with_elements(elements: impl IntoIterator<Item = StyleElement>) -> Self {
        let doc = Self::new();
        for element in elements {
            doc.append(element);
        }
        doc
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<StyleElement>> {
        self.head.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<StyleElement>> {
        self.head.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether an element with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.read().iter().any(|e| e.id == id)
    }

    /// Insert ahead of every existing style element (cascade layer ordering)
    pub fn prepend(&self, element: StyleElement) -> bool {
        let mut head = self.write();
        if head.iter().any(|e| e.id == element.id) {
            return false;
        }
        head.insert(0, element);
        true
    }

    /// Insert after every existing style element
    pub fn append(&self, element: StyleElement) -> bool {
        let mut head = self.write();
        if head.iter().any(|e| e.id == element.id) {
            return false;
        }
        head.push(element);
        true
    }

    /// Get an element by id
    pub fn get(&self, id: &str) -> Option<StyleElement> {
        self.read().iter().find(|e| e.id == id).cloned()
    }

    /// Element ids in document order
    pub fn element_ids(&self) -> Vec<String> {
        self.read().iter().map(|e| e.id.clone()).collect()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the head has no style elements
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Render all elements in order
    pub fn render(&self) -> String {
        self.read()
            .iter()
            .map(StyleElement::to_html)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
