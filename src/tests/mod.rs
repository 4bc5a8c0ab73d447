use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::invoice::{AnalyzedInvoice, InvoiceRecord, ReimbursementStatus};
use crate::llm::{LanguageModel, LlmError};
use crate::semantic::{Embedder, EmbeddingError, InvoiceStore, SearchStrategy};

mod web;

pub const HASH_DIMENSIONS: usize = 16;

/// Deterministic bag-of-words embedder: each lowercase word bumps one of
/// `HASH_DIMENSIONS` buckets.
pub struct HashEmbedder {
    name: String,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::named("hash-embedder")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed` calls so far (batches count once per text).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; HASH_DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % HASH_DIMENSIONS as u64) as usize] += 1.0;
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        HASH_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }
}

/// Fails on any text containing "poison".
pub struct PoisonEmbedder;

impl Embedder for PoisonEmbedder {
    fn name(&self) -> &str {
        "hash-embedder"
    }

    fn dimensions(&self) -> usize {
        HASH_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains("poison") {
            return Err(EmbeddingError::EmbeddingFailed("poisoned text".into()));
        }
        Ok(HashEmbedder::vector(text))
    }
}

/// Language model returning canned replies and recording prompts.
pub struct ScriptedModel {
    reply: Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn constant(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_| Ok(reply.clone()))
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.reply)(prompt)
    }
}

pub fn record(id: &str, status: ReimbursementStatus, employee: &str, date: &str) -> InvoiceRecord {
    InvoiceRecord {
        invoice_id: id.to_string(),
        status,
        reason: format!("reason for {id}"),
        employee_name: employee.to_string(),
        date: date.to_string(),
    }
}

pub fn analyzed(record: InvoiceRecord, full_text: &str) -> AnalyzedInvoice {
    AnalyzedInvoice {
        record,
        full_text: full_text.to_string(),
    }
}

pub fn open_store(dir: &Path, strategy: SearchStrategy) -> (Arc<HashEmbedder>, InvoiceStore) {
    let embedder = Arc::new(HashEmbedder::new());
    let store = InvoiceStore::load(dir, embedder.clone(), strategy).unwrap();
    (embedder, store)
}

/// One-page PDF showing `text` in Courier.
pub fn pdf_with_text(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
