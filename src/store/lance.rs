//! LanceDB 벡터 인덱스 - 로컬 백엔드
//!
//! 인덱스 하나 = LanceDB 테이블 하나이고, 네임스페이스는 `namespace` 컬럼으로 구분합니다.
//! 네임스페이스 삭제는 해당 컬럼 필터로 행을 지웁니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::{IndexInfo, RecordMetadata, ScoredRecord, VectorIndexService, VectorRecord};

/// 벡터 컬럼 이름
const VECTOR_COLUMN: &str = "vector";

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 인덱스 서비스
pub struct LanceVectorIndex {
    db: Connection,
}

impl LanceVectorIndex {
    /// LanceDB 디렉토리 열기 (없으면 생성)
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            tokio::fs::create_dir_all(path)
                .await
                .context("Failed to create LanceDB directory")?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    /// 테이블 스키마
    fn schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("namespace", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("cell_type", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(namespace: &str, records: &[VectorRecord]) -> Result<RecordBatch> {
        let first = records
            .first()
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty records"))?;
        let dimension = first.values.len();
        if dimension == 0 {
            anyhow::bail!("Cannot store empty vectors");
        }
        if records.iter().any(|r| r.values.len() != dimension) {
            anyhow::bail!("Records have inconsistent vector dimensions");
        }

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let namespaces: Vec<&str> = vec![namespace; records.len()];
        let texts: Vec<&str> = records.iter().map(|r| r.metadata.text.as_str()).collect();
        let sources: Vec<&str> = records.iter().map(|r| r.metadata.source.as_str()).collect();
        let cell_types: Vec<&str> = records
            .iter()
            .map(|r| r.metadata.cell_type.as_str())
            .collect();
        let chunk_indices: Vec<i32> = records
            .iter()
            .map(|r| i32::try_from(r.metadata.chunk_index))
            .collect::<std::result::Result<_, _>>()
            .context("chunk_index out of range")?;

        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.values.iter().copied())
            .collect();

        let dimension = i32::try_from(dimension).context("Vector dimension out of range")?;
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create vector array")?;

        RecordBatch::try_new(
            Arc::new(Self::schema(dimension)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(namespaces)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(cell_types)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(vectors),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 검색 결과 배치 → ScoredRecord
    fn batch_to_records(batch: &RecordBatch) -> Result<Vec<ScoredRecord>> {
        let string_column = |name: &str| -> Result<&StringArray> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
        };

        let ids = string_column("id")?;
        let texts = string_column("text")?;
        let sources = string_column("source")?;
        let cell_types = string_column("cell_type")?;

        let chunk_indices = batch
            .column_by_name("chunk_index")
            .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing chunk_index column"))?;

        // _distance 컬럼 (LanceDB가 자동 추가)
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

        Ok((0..batch.num_rows())
            .map(|i| ScoredRecord {
                id: ids.value(i).to_string(),
                // L2 거리 → 유사도
                score: 1.0 / (1.0 + distances.value(i)),
                metadata: RecordMetadata {
                    text: texts.value(i).to_string(),
                    source: sources.value(i).to_string(),
                    cell_type: cell_types.value(i).to_string(),
                    chunk_index: usize::try_from(chunk_indices.value(i)).unwrap_or(0),
                },
            })
            .collect())
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn open_table(&self, name: &str) -> Result<lancedb::table::Table> {
        self.db
            .open_table(name)
            .execute()
            .await
            .with_context(|| format!("Failed to open table {}", name))
    }
}

/// SQL 문자열 리터럴용 따옴표 이스케이프
fn namespace_filter(namespace: &str) -> String {
    format!("namespace = '{}'", namespace.replace('\'', "''"))
}

#[async_trait]
impl VectorIndexService for LanceVectorIndex {
    async fn upsert(&self, index: &str, namespace: &str, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = Self::records_to_batch(namespace, records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists(index).await? {
            self.open_table(index)
                .await?
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            // 로컬 백엔드는 첫 쓰기에서 테이블 생성
            tracing::info!("Creating LanceDB table {} on first write", index);
            self.db
                .create_table(index, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(records.len())
    }

    async fn query(
        &self,
        index: &str,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 || !self.table_exists(index).await? {
            return Ok(Vec::new());
        }

        let stream = self
            .open_table(index)
            .await?
            .vector_search(vector.to_vec())
            .context("Failed to create vector search")?
            .only_if(namespace_filter(namespace))
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut results = Vec::new();
        for batch in &batches {
            results.extend(Self::batch_to_records(batch)?);
        }
        Ok(results)
    }

    async fn delete_namespace(&self, index: &str, namespace: &str) -> Result<serde_json::Value> {
        if !self.table_exists(index).await? {
            anyhow::bail!("Index not found: {}", index);
        }

        self.open_table(index)
            .await?
            .delete(&namespace_filter(namespace))
            .await
            .context("Failed to delete namespace rows")?;

        Ok(serde_json::json!({}))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let schema = self.open_table(&name).await?.schema().await?;
            let dimension = schema
                .field_with_name(VECTOR_COLUMN)
                .ok()
                .and_then(|f| match f.data_type() {
                    DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                    _ => None,
                });
            infos.push(IndexInfo { name, dimension });
        }
        Ok(infos)
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<()> {
        if self.table_exists(name).await? {
            anyhow::bail!("Index already exists: {}", name);
        }

        let dimension = i32::try_from(dimension).context("Vector dimension out of range")?;
        self.db
            .create_empty_table(name, Arc::new(Self::schema(dimension)))
            .execute()
            .await
            .context("Failed to create table")?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.db
            .drop_table(name)
            .await
            .with_context(|| format!("Failed to drop table {}", name))
    }

    fn name(&self) -> &str {
        "lancedb"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn create_test_record(id: &str, text: &str, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values,
            metadata: RecordMetadata {
                text: text.to_string(),
                source: "analysis.ipynb".to_string(),
                cell_type: "code".to_string(),
                chunk_index: 0,
            },
        }
    }

    async fn open(temp_dir: &TempDir) -> LanceVectorIndex {
        LanceVectorIndex::open(&temp_dir.path().join("vectors.lance"))
            .await
            .unwrap()
    }

    #[test]
    fn test_namespace_filter_escapes_quotes() {
        assert_eq!(namespace_filter("ns"), "namespace = 'ns'");
        assert_eq!(namespace_filter("it's"), "namespace = 'it''s'");
    }

    #[tokio::test]
    async fn test_create_and_list_index() {
        let temp_dir = TempDir::new().unwrap();
        let index = open(&temp_dir).await;

        index.create_index("nb-index", DIM).await.unwrap();
        assert!(index.create_index("nb-index", DIM).await.is_err());

        let infos = index.list_indexes().await.unwrap();
        assert_eq!(
            infos,
            vec![IndexInfo {
                name: "nb-index".to_string(),
                dimension: Some(DIM)
            }]
        );

        index.delete_index("nb-index").await.unwrap();
        assert!(index.list_indexes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_scoped_to_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let index = open(&temp_dir).await;

        index
            .upsert(
                "nb-index",
                "jupyter_rag:240101_0900:nb-index",
                &[
                    create_test_record("a1", "first", vec![0.1; DIM]),
                    create_test_record("a2", "second", vec![0.2; DIM]),
                ],
            )
            .await
            .unwrap();
        index
            .upsert(
                "nb-index",
                "jupyter_rag:240101_0930:nb-index",
                &[create_test_record("b1", "other", vec![0.1; DIM])],
            )
            .await
            .unwrap();

        let results = index
            .query("nb-index", "jupyter_rag:240101_0900:nb-index", &[0.1; DIM], 10)
            .await
            .unwrap();
        let mut ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(results[0].metadata.source, "analysis.ipynb");
    }

    #[tokio::test]
    async fn test_delete_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let index = open(&temp_dir).await;

        index
            .upsert("nb-index", "keep", &[create_test_record("k", "keep", vec![0.3; DIM])])
            .await
            .unwrap();
        index
            .upsert("nb-index", "drop", &[create_test_record("d", "drop", vec![0.3; DIM])])
            .await
            .unwrap();

        let response = index.delete_namespace("nb-index", "drop").await.unwrap();
        assert_eq!(response, serde_json::json!({}));

        assert!(index
            .query("nb-index", "drop", &[0.3; DIM], 5)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            index.query("nb-index", "keep", &[0.3; DIM], 5).await.unwrap().len(),
            1
        );

        // 두 번째 삭제도 빈 응답
        let again = index.delete_namespace("nb-index", "drop").await.unwrap();
        assert_eq!(again, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_query_missing_index_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let index = open(&temp_dir).await;
        let results = index.query("missing", "ns", &[0.1; DIM], 5).await.unwrap();
        assert!(results.is_empty());
    }
}
