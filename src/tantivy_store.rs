use std::ops::Bound;
use std::path::PathBuf;

use anyhow::Result;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, RangeQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, FAST, INDEXED,
    STORED,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter,
    TextAnalyzer,
};
use tantivy::{doc, Index, TantivyDocument};
use tracing::debug;

use crate::models::{RetrievalCandidate, RetrievalOrigin, StoredChunk};

const ANALYZER: &str = "novel_en";
const CHAPTER_FIELD: &str = "chapter_number";

/// BM25 index over a novel's chunks, one directory per novel.
#[derive(Clone)]
pub struct TantivyStore {
    root: PathBuf,
}

#[derive(Clone, Copy)]
struct TantivyFields {
    chunk_id: Field,
    chapter_number: Field,
    content: Field,
}

impl TantivyStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn index_dir(&self, novel_slug: &str) -> PathBuf {
        self.root.join(novel_slug)
    }

    pub fn rebuild(&self, novel_slug: &str, chunks: &[StoredChunk]) -> Result<()> {
        let dir = self.index_dir(novel_slug);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        let (schema, fields) = build_schema();
        let index = Index::create_in_dir(&dir, schema)?;
        register_analyzer(&index)?;
        let mut writer = index.writer(50_000_000)?;

        for chunk in chunks {
            writer.add_document(doc!(
                fields.chunk_id => chunk.id,
                fields.chapter_number => chunk.chapter_number,
                fields.content => chunk.content.clone(),
            ))?;
        }

        writer.commit()?;
        debug!(novel = novel_slug, chunks = chunks.len(), "lexical index rebuilt");
        Ok(())
    }

    /// Top `k` chunks by BM25, restricted to `chapter_number <= max_chapter`
    /// before ranking when a threshold is given.
    pub fn top_k(
        &self,
        novel_slug: &str,
        query: &str,
        k: usize,
        max_chapter: Option<i64>,
    ) -> Result<Vec<RetrievalCandidate>> {
        let dir = self.index_dir(novel_slug);
        if k == 0 || !dir.exists() {
            return Ok(vec![]);
        }

        let index = Index::open_in_dir(&dir)?;
        register_analyzer(&index)?;
        let fields = resolve_fields(&index.schema())?;
        let reader = index.reader()?;
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&index, vec![fields.content]);
        let (text_query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(?errors, "lexical query parsed leniently");
        }

        let query: Box<dyn Query> = match max_chapter {
            Some(max) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, text_query),
                (
                    Occur::Must,
                    Box::new(RangeQuery::new_i64_bounds(
                        CHAPTER_FIELD.to_string(),
                        Bound::Unbounded,
                        Bound::Included(max),
                    )),
                ),
            ])),
            None => text_query,
        };

        let top_docs = searcher.search(&query, &TopDocs::with_limit(k))?;

        let mut out = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc = searcher.doc::<TantivyDocument>(addr)?;
            if let Some(chunk_id) = doc.get_first(fields.chunk_id).and_then(|v| v.as_i64()) {
                out.push(RetrievalCandidate {
                    chunk_id,
                    score,
                    origin: RetrievalOrigin::Lexical,
                });
            }
        }

        Ok(out)
    }
}

fn register_analyzer(index: &Index) -> Result<()> {
    let stop_words = StopWordFilter::new(Language::English)
        .ok_or_else(|| anyhow::anyhow!("tantivy has no English stop words"))?;
    let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(stop_words)
        .filter(Stemmer::new(Language::English))
        .build();
    index.tokenizers().register(ANALYZER, analyzer);
    Ok(())
}

fn build_schema() -> (Schema, TantivyFields) {
    let mut builder = Schema::builder();

    let chunk_id = builder.add_i64_field("chunk_id", STORED);
    let chapter_number = builder.add_i64_field(CHAPTER_FIELD, INDEXED | FAST);
    let content_options = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(ANALYZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let content = builder.add_text_field("content", content_options);

    (
        builder.build(),
        TantivyFields {
            chunk_id,
            chapter_number,
            content,
        },
    )
}

fn resolve_fields(schema: &Schema) -> Result<TantivyFields> {
    Ok(TantivyFields {
        chunk_id: schema
            .get_field("chunk_id")
            .map_err(|err| anyhow::anyhow!(err.to_string()))?,
        chapter_number: schema
            .get_field(CHAPTER_FIELD)
            .map_err(|err| anyhow::anyhow!(err.to_string()))?,
        content: schema
            .get_field("content")
            .map_err(|err| anyhow::anyhow!(err.to_string()))?,
    })
}
