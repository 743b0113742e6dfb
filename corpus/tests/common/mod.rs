#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use teddy_corpus::{
    CacheStore, CorpusBuilder, DataExtractor, Record, SourceFile, TabularExtractor,
};
use teddy_embeddings::{
    Embedding, EmbeddingProvider, ModelRegistry, ModelSpec, ProviderFactory, Result,
};

/// Deterministic provider: words map onto fixed axes.
pub struct KeywordProvider {
    model: String,
    batch_calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

fn keyword_vector(text: &str) -> Embedding {
    let text = text.to_lowercase();
    let mut v = vec![0.0_f32; 3];
    if text.contains("hello") || text.contains("greeting") {
        v[0] += 1.0;
    }
    if text.contains("world") || text.contains("planet") {
        v[1] += 1.0;
    }
    if text.contains("greeting") {
        v[2] += 0.1;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[2] = 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn name(&self) -> &str {
        "keyword"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

#[derive(Clone, Default)]
pub struct KeywordFactory {
    pub batch_calls: Arc<AtomicUsize>,
    pub delay: Option<Duration>,
}

impl ProviderFactory for KeywordFactory {
    fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::new(KeywordProvider {
            model: spec.model.clone(),
            batch_calls: Arc::clone(&self.batch_calls),
            delay: self.delay,
        }))
    }
}

/// Wraps the tabular extractor and counts `extract` calls.
#[derive(Default)]
pub struct CountingExtractor {
    pub calls: AtomicUsize,
}

impl DataExtractor for CountingExtractor {
    fn list_sheets(&self, file: &SourceFile) -> teddy_corpus::Result<Option<Vec<String>>> {
        TabularExtractor.list_sheets(file)
    }

    fn list_columns(
        &self,
        file: &SourceFile,
        sheet: Option<&str>,
    ) -> teddy_corpus::Result<Vec<String>> {
        TabularExtractor.list_columns(file, sheet)
    }

    fn extract(
        &self,
        file: &SourceFile,
        sheet: Option<&str>,
        columns: &[String],
    ) -> teddy_corpus::Result<Vec<Record>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TabularExtractor.extract(file, sheet, columns)
    }
}

pub fn test_specs() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("m1", "test/keyword-one"),
        ModelSpec::new("m2", "test/keyword-two"),
    ]
}

pub struct Harness {
    pub builder: CorpusBuilder,
    pub factory: KeywordFactory,
    pub extractor: Arc<CountingExtractor>,
    pub _temp_dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_factory(KeywordFactory::default()).await
    }

    pub async fn with_factory(factory: KeywordFactory) -> Self {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path().join("cache")).await.unwrap();
        let registry = Arc::new(ModelRegistry::new(test_specs(), factory.clone()));
        let extractor = Arc::new(CountingExtractor::default());
        let builder = CorpusBuilder::new(store, registry)
            .with_extractor(Arc::clone(&extractor) as Arc<dyn DataExtractor>);
        Self {
            builder,
            factory,
            extractor,
            _temp_dir: temp_dir,
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.factory.batch_calls.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.extractor.calls.load(Ordering::SeqCst)
    }
}

pub fn greetings_csv() -> SourceFile {
    SourceFile::new("greetings.csv", "id,text\n1,hello\n2,world\n").unwrap()
}
