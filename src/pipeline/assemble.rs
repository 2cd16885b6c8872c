//! Build a new document out of pages imported from other documents.
//!
//! Split, merge, encrypt and decrypt all write a *fresh* document rather than
//! patching the input: the catalog, outlines and forms of the source are
//! dropped and only what the copied pages reference survives.
//!
//! ## Inherited page attributes
//!
//! `Resources`, `MediaBox`, `CropBox` and `Rotate` may live on any ancestor
//! `Pages` node. A page moved under a new parent would lose them, so they are
//! copied onto the page itself before the move.

use crate::error::DocError;
use crate::pipeline::layout::real;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use tracing::debug;

/// Page attributes a page may inherit from its ancestors.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// US Letter, used when no ancestor declares a `MediaBox`.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against `Parent` cycles in malformed files.
const MAX_TREE_DEPTH: usize = 64;

/// Accumulates pages for a new document.
pub struct PageAssembler {
    doc: Document,
    kids: Vec<ObjectId>,
}

impl Default for PageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAssembler {
    pub fn new() -> Self {
        Self {
            doc: Document::with_version("1.5"),
            kids: Vec::new(),
        }
    }

    /// Pages collected so far.
    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Copy the given 1-based `pages` of `source`, in order.
    ///
    /// Every object of `source` is moved across; objects the copied pages do
    /// not reach are pruned in [`finish`](Self::finish).
    pub fn append_pages(&mut self, mut source: Document, pages: &[u32]) -> Result<usize, DocError> {
        source.renumber_objects_with(self.doc.max_id + 1);
        let page_ids = source.get_pages();

        let mut copied = Vec::with_capacity(pages.len());
        for number in pages {
            let id = page_ids
                .get(number)
                .copied()
                .ok_or_else(|| DocError::backend(format!("page {number} not found")))?;
            let flattened = flatten_page(&source, id)?;
            copied.push((id, flattened));
        }
        for (id, page) in &copied {
            source.objects.insert(*id, Object::Dictionary(page.clone()));
        }

        self.doc.objects.extend(source.objects);
        self.doc.max_id = self
            .doc
            .objects
            .keys()
            .map(|(number, _)| *number)
            .max()
            .unwrap_or(0);
        self.kids.extend(copied.iter().map(|(id, _)| *id));
        debug!(pages = copied.len(), total = self.kids.len(), "Appended pages");
        Ok(copied.len())
    }

    /// Copy every page of `source`.
    pub fn append_document(&mut self, source: Document) -> Result<usize, DocError> {
        let numbers: Vec<u32> = source.get_pages().keys().copied().collect();
        self.append_pages(source, &numbers)
    }

    /// Copy page `number` of `source`, leaving `source` untouched.
    ///
    /// Only objects the page reaches are copied. References to other page
    /// tree nodes (e.g. link annotations pointing elsewhere) become null.
    pub fn copy_page(&mut self, source: &Document, number: u32) -> Result<ObjectId, DocError> {
        let page_id = source
            .get_pages()
            .get(&number)
            .copied()
            .ok_or_else(|| DocError::backend(format!("page {number} not found")))?;
        let mut page = flatten_page(source, page_id)?;
        page.remove(b"Parent");

        let new_page_id = self.doc.new_object_id();
        let mut copy = PageCopy {
            source,
            page: (page_id, new_page_id),
            ids: BTreeMap::new(),
            pending: Vec::new(),
        };
        let page = copy.remap_dict(&mut self.doc, &page);
        while let Some(old_id) = copy.pending.pop() {
            let Some(object) = source.objects.get(&old_id) else {
                continue;
            };
            let remapped = copy.remap(&mut self.doc, object);
            let new_id = copy.ids[&old_id];
            self.doc.objects.insert(new_id, remapped);
        }
        self.doc.objects.insert(new_page_id, Object::Dictionary(page));
        self.kids.push(new_page_id);
        debug!(page = number, objects = copy.ids.len(), "Copied page");
        Ok(new_page_id)
    }

    /// Add an object that a generated page will reference.
    pub fn add_object(&mut self, object: impl Into<Object>) -> ObjectId {
        self.doc.add_object(object)
    }

    /// Add a generated page with one content stream.
    pub fn add_new_page(&mut self, media_box: [f32; 4], resources: Dictionary, content: Vec<u8>) -> ObjectId {
        let content_id = self.doc.add_object(Stream::new(Dictionary::new(), content));
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set(
            "MediaBox",
            Object::Array(media_box.iter().map(|v| real(*v)).collect()),
        );
        page.set("Resources", Object::Dictionary(resources));
        page.set("Contents", Object::Reference(content_id));
        let id = self.doc.add_object(page);
        self.kids.push(id);
        id
    }

    /// Link the page tree and catalog, drop unreachable objects, and return
    /// the document. Fails with [`DocError::EmptyDocument`] if no page was
    /// added.
    pub fn finish(mut self) -> Result<Document, DocError> {
        if self.kids.is_empty() {
            return Err(DocError::EmptyDocument);
        }
        let pages_id = self.doc.new_object_id();
        for kid in &self.kids {
            if let Ok(Object::Dictionary(page)) = self.doc.get_object_mut(*kid) {
                page.set("Parent", Object::Reference(pages_id));
            }
        }

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set(
            "Kids",
            Object::Array(self.kids.iter().map(|id| Object::Reference(*id)).collect()),
        );
        pages.set("Count", Object::Integer(self.kids.len() as i64));
        self.doc.objects.insert(pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        let pruned = self.doc.prune_objects();
        debug!(pages = self.kids.len(), pruned = pruned.len(), "Assembled document");
        Ok(self.doc)
    }
}

/// The page dictionary with inherited attributes copied onto it.
pub fn flatten_page(doc: &Document, page_id: ObjectId) -> Result<Dictionary, DocError> {
    let mut page = doc.get_dictionary(page_id)?.clone();
    let mut parent = parent_of(&page);
    let mut depth = 0;
    while let Some(parent_id) = parent {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = doc.get_dictionary(parent_id) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = parent_of(node);
    }
    if !page.has(b"MediaBox") {
        page.set(
            "MediaBox",
            Object::Array(DEFAULT_MEDIA_BOX.iter().map(|v| real(*v)).collect()),
        );
    }
    Ok(page)
}

/// The page's rotation including inherited values, normalised to 0..360.
pub fn effective_rotation(doc: &Document, page_id: ObjectId) -> Result<i64, DocError> {
    let page = flatten_page(doc, page_id)?;
    let rotate = match page.get(b"Rotate") {
        Ok(Object::Integer(r)) => *r,
        Ok(Object::Real(r)) => *r as i64,
        _ => 0,
    };
    Ok(rotate.rem_euclid(360))
}

/// Object renumbering for one [`PageAssembler::copy_page`] call.
struct PageCopy<'a> {
    source: &'a Document,
    /// The copied page, old id and new id.
    page: (ObjectId, ObjectId),
    ids: BTreeMap<ObjectId, ObjectId>,
    /// Source objects allocated an id but not yet copied.
    pending: Vec<ObjectId>,
}

impl PageCopy<'_> {
    fn remap(&mut self, target: &mut Document, object: &Object) -> Object {
        match object {
            Object::Reference(id) => self.reference(target, *id),
            Object::Array(items) => {
                Object::Array(items.iter().map(|item| self.remap(target, item)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(self.remap_dict(target, dict)),
            Object::Stream(stream) => {
                let dict = self.remap_dict(target, &stream.dict);
                let mut copied = Stream::new(dict, stream.content.clone());
                copied.allows_compression = stream.allows_compression;
                Object::Stream(copied)
            }
            other => other.clone(),
        }
    }

    fn remap_dict(&mut self, target: &mut Document, dict: &Dictionary) -> Dictionary {
        let mut out = Dictionary::new();
        for (key, value) in dict.iter() {
            out.set(key.clone(), self.remap(target, value));
        }
        out
    }

    fn reference(&mut self, target: &mut Document, id: ObjectId) -> Object {
        if id == self.page.0 {
            return Object::Reference(self.page.1);
        }
        if let Some(new_id) = self.ids.get(&id) {
            return Object::Reference(*new_id);
        }
        match self.source.objects.get(&id) {
            Some(object) if !is_page_tree_node(object) => {
                let new_id = target.new_object_id();
                self.ids.insert(id, new_id);
                self.pending.push(id);
                Object::Reference(new_id)
            }
            _ => Object::Null,
        }
    }
}

fn is_page_tree_node(object: &Object) -> bool {
    match object {
        Object::Dictionary(dict) => dict.type_is(b"Page") || dict.type_is(b"Pages"),
        _ => false,
    }
}

fn parent_of(dict: &Dictionary) -> Option<ObjectId> {
    match dict.get(b"Parent") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    }
}
