//! In-Memory 벡터 인덱스 - 테스트 / 드라이런용
//!
//! 네임스페이스별 Vec을 `RwLock<HashMap>` 뒤에 둡니다.
//! 검색은 전수 코사인 유사도입니다.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use super::{IndexInfo, ScoredRecord, VectorIndexService, VectorRecord};

struct MemoryIndex {
    dimension: usize,
    namespaces: HashMap<String, Vec<VectorRecord>>,
}

/// In-Memory 인덱스 서비스
pub struct InMemoryIndex {
    indexes: RwLock<HashMap<String, MemoryIndex>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// 인덱스 하나가 미리 생성된 상태로 시작
    pub fn with_index(name: &str, dimension: usize) -> Self {
        let mut indexes = HashMap::new();
        indexes.insert(
            name.to_string(),
            MemoryIndex {
                dimension,
                namespaces: HashMap::new(),
            },
        );
        Self {
            indexes: RwLock::new(indexes),
        }
    }

    /// 네임스페이스의 레코드 수
    pub fn namespace_len(&self, index: &str, namespace: &str) -> usize {
        self.read()
            .ok()
            .and_then(|indexes| {
                indexes
                    .get(index)
                    .and_then(|i| i.namespaces.get(namespace).map(Vec::len))
            })
            .unwrap_or(0)
    }

    /// 인덱스의 네임스페이스 목록 (정렬)
    pub fn namespaces(&self, index: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .ok()
            .and_then(|indexes| {
                indexes
                    .get(index)
                    .map(|i| i.namespaces.keys().cloned().collect())
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryIndex>>> {
        self.indexes
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryIndex>>> {
        self.indexes
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory index lock poisoned"))
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// 코사인 유사도 (길이 불일치 / 영벡터는 0)
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndexService for InMemoryIndex {
    async fn upsert(&self, index: &str, namespace: &str, records: &[VectorRecord]) -> Result<usize> {
        let mut indexes = self.write()?;
        let target = indexes
            .get_mut(index)
            .ok_or_else(|| anyhow::anyhow!("Index not found: {}", index))?;

        if let Some(bad) = records.iter().find(|r| r.values.len() != target.dimension) {
            anyhow::bail!(
                "Vector dimension {} does not match index dimension {}",
                bad.values.len(),
                target.dimension
            );
        }

        let stored = target.namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            stored.retain(|r| r.id != record.id);
            stored.push(record.clone());
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
        let indexes = self.read()?;
        let target = indexes
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Index not found: {}", index))?;

        let Some(records) = target.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredRecord> = records
            .iter()
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_namespace(&self, index: &str, namespace: &str) -> Result<serde_json::Value> {
        let mut indexes = self.write()?;
        let target = indexes
            .get_mut(index)
            .ok_or_else(|| anyhow::anyhow!("Index not found: {}", index))?;
        target.namespaces.remove(namespace);
        Ok(serde_json::json!({}))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        let indexes = self.read()?;
        let mut infos: Vec<IndexInfo> = indexes
            .iter()
            .map(|(name, i)| IndexInfo {
                name: name.clone(),
                dimension: Some(i.dimension),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<()> {
        let mut indexes = self.write()?;
        if indexes.contains_key(name) {
            anyhow::bail!("Index already exists: {}", name);
        }
        indexes.insert(
            name.to_string(),
            MemoryIndex {
                dimension,
                namespaces: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let mut indexes = self.write()?;
        indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("Index not found: {}", name))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordMetadata;

    fn record(id: &str, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values,
            metadata: RecordMetadata {
                text: format!("text {}", id),
                source: "nb.ipynb".to_string(),
                cell_type: "markdown".to_string(),
                chunk_index: 0,
            },
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let index = InMemoryIndex::with_index("idx", 2);
        index
            .upsert(
                "idx",
                "ns",
                &[
                    record("far", vec![0.0, 1.0]),
                    record("near", vec![1.0, 0.1]),
                    record("mid", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let results = index.query("idx", "ns", &[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = InMemoryIndex::with_index("idx", 2);
        let result = index.upsert("idx", "ns", &[record("a", vec![1.0])]).await;
        assert!(result.is_err());
        assert_eq!(index.namespace_len("idx", "ns"), 0);
    }

    #[tokio::test]
    async fn test_delete_namespace_leaves_others() {
        let index = InMemoryIndex::with_index("idx", 2);
        index.upsert("idx", "a", &[record("1", vec![1.0, 0.0])]).await.unwrap();
        index.upsert("idx", "b", &[record("2", vec![1.0, 0.0])]).await.unwrap();

        let response = index.delete_namespace("idx", "a").await.unwrap();
        assert_eq!(response, serde_json::json!({}));
        assert_eq!(index.namespace_len("idx", "a"), 0);
        assert_eq!(index.namespace_len("idx", "b"), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_index() {
        let index = InMemoryIndex::new();
        index.create_index("idx", 4).await.unwrap();
        assert!(index.create_index("idx", 4).await.is_err());

        let infos = index.list_indexes().await.unwrap();
        assert_eq!(
            infos,
            vec![IndexInfo {
                name: "idx".to_string(),
                dimension: Some(4)
            }]
        );
    }
}
