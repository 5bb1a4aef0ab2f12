//! Exact L2 nearest-neighbour index over chunk embeddings.

use std::{cmp::Ordering, io::Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::{error::AppError, utils::embedding::EmbeddingProvider};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

const INDEX_MAGIC: &[u8; 4] = b"FLI1";
const HEADER_LEN: usize = 4 + 4 + 8;

/// Upper bound on neighbours returned by [`query`].
pub const MAX_NEIGHBOURS: usize = 5;

/// Flat, row-major store of equally sized vectors searched exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<(), AppError> {
        if vector.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "embedding has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// Positions of the `k` closest vectors with their squared L2 distance, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, AppError> {
        if query.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimension
            )));
        }
        if self.dimension == 0 {
            return Ok(Vec::new());
        }

        let mut distances: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| {
                let distance = row
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>();
                (position, distance)
            })
            .collect();

        distances.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        distances.truncate(k);
        Ok(distances)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        buf.put_slice(INDEX_MAGIC);
        buf.put_u32_le(u32::try_from(self.dimension).unwrap_or(u32::MAX));
        buf.put_u64_le(self.len() as u64);
        for value in &self.vectors {
            buf.put_f32_le(*value);
        }
        buf.freeze()
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, AppError> {
        let corrupt = |reason: &str| AppError::Processing(format!("corrupt vector index: {reason}"));

        if bytes.len() < HEADER_LEN || &bytes[..4] != INDEX_MAGIC {
            return Err(corrupt("missing header"));
        }
        bytes.advance(4);
        let dimension = bytes.get_u32_le() as usize;
        let count = usize::try_from(bytes.get_u64_le()).map_err(|_| corrupt("bad count"))?;

        let expected = dimension
            .checked_mul(count)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| corrupt("size overflow"))?;
        if bytes.remaining() != expected {
            return Err(corrupt("payload length does not match header"));
        }

        let mut vectors = Vec::with_capacity(dimension * count);
        while bytes.has_remaining() {
            vectors.push(bytes.get_f32_le());
        }
        Ok(Self { dimension, vectors })
    }

    /// Writes the serialized index to a fresh, uniquely named temporary file.
    pub fn write_to_temp_file(&self) -> Result<NamedTempFile, AppError> {
        let mut file = tempfile::Builder::new()
            .prefix("chunk-index-")
            .suffix(".bin")
            .tempfile()?;
        file.write_all(&self.to_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

/// An index over a chunk set together with its on-disk and JSON forms.
#[derive(Debug)]
pub struct BuiltIndex {
    pub index: FlatL2Index,
    pub index_file: NamedTempFile,
    pub chunks_json: String,
}

impl BuiltIndex {
    pub async fn index_bytes(&self) -> Result<Vec<u8>, AppError> {
        Ok(tokio::fs::read(self.index_file.path()).await?)
    }
}

/// Embeds every chunk and stacks the vectors into a flat index.
///
/// An empty chunk set yields `Ok(None)`: there is simply nothing to search.
#[instrument(skip_all, fields(chunks = chunks.len(), backend = embedding.backend_label()))]
pub async fn build_index(
    embedding: &EmbeddingProvider,
    chunks: &[String],
) -> Result<Option<BuiltIndex>, AppError> {
    if chunks.is_empty() {
        return Ok(None);
    }

    let mut index: Option<FlatL2Index> = None;
    for chunk in chunks {
        let vector = embedding.embed(chunk).await?;
        index
            .get_or_insert_with(|| FlatL2Index::new(vector.len()))
            .add(&vector)?;
    }
    let Some(index) = index else {
        return Ok(None);
    };

    let index_file = index.write_to_temp_file()?;
    let chunks_json = serde_json::to_string(chunks)?;
    debug!(vectors = index.len(), dimension = index.dimension(), "built flat index");

    Ok(Some(BuiltIndex {
        index,
        index_file,
        chunks_json,
    }))
}

/// Texts of the chunks nearest to `query_text`, closest first.
///
/// At most `min(k, MAX_NEIGHBOURS, chunks.len())` results are returned.
pub async fn query(
    embedding: &EmbeddingProvider,
    index: &FlatL2Index,
    chunks: &[String],
    query_text: &str,
    k: usize,
) -> Result<Vec<String>, AppError> {
    let limit = k.min(MAX_NEIGHBOURS).min(chunks.len());
    if limit == 0 {
        return Ok(Vec::new());
    }

    let query_vector = embedding.embed(query_text).await?;
    let neighbours = index.search(&query_vector, index.len())?;

    Ok(neighbours
        .into_iter()
        .filter_map(|(position, _)| chunks.get(position).cloned())
        .take(limit)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn search_orders_by_distance() {
        let mut index = FlatL2Index::new(2);
        index.add(&[0.0, 0.0]).expect("ok");
        index.add(&[5.0, 5.0]).expect("ok");
        index.add(&[1.0, 1.0]).expect("ok");

        let hits = index.search(&[0.9, 0.9], 2).expect("ok");
        let positions: Vec<usize> = hits.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![2, 0]);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = FlatL2Index::new(3);
        assert!(index.add(&[1.0]).is_err());
        assert!(index.search(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn serialized_index_restores_identically() {
        let mut index = FlatL2Index::new(3);
        index.add(&[0.5, -1.0, 2.0]).expect("ok");
        index.add(&[3.0, 0.0, 0.25]).expect("ok");

        let restored = FlatL2Index::from_bytes(&index.to_bytes()).expect("ok");
        assert_eq!(restored, index);
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let mut index = FlatL2Index::new(2);
        index.add(&[1.0, 2.0]).expect("ok");
        let bytes = index.to_bytes();

        assert!(FlatL2Index::from_bytes(&bytes[..bytes.len() - 2]).is_err());
        assert!(FlatL2Index::from_bytes(b"nope").is_err());
    }

    #[tokio::test]
    async fn empty_chunk_set_builds_nothing() {
        let embedding = EmbeddingProvider::new_hashed(16);
        assert!(build_index(&embedding, &[]).await.expect("ok").is_none());
    }

    #[tokio::test]
    async fn built_index_covers_every_chunk() {
        let embedding = EmbeddingProvider::new_hashed(32);
        let texts = chunks(&["alpha beta", "gamma delta", "epsilon"]);

        let built = build_index(&embedding, &texts).await.expect("build").expect("index");
        assert_eq!(built.index.len(), 3);

        let on_disk = FlatL2Index::from_bytes(&built.index_bytes().await.expect("ok")).expect("ok");
        assert_eq!(on_disk, built.index);

        let decoded: Vec<String> = serde_json::from_str(&built.chunks_json).expect("ok");
        assert_eq!(decoded, texts);
    }

    #[tokio::test]
    async fn query_finds_exact_match_first_and_caps_results() {
        let embedding = EmbeddingProvider::new_hashed(512);
        let texts = chunks(&["one", "two", "three", "four", "five", "six", "seven"]);
        let built = build_index(&embedding, &texts).await.expect("build").expect("index");

        let hits = query(&embedding, &built.index, &texts, "three", 10)
            .await
            .expect("ok");
        assert_eq!(hits.len(), MAX_NEIGHBOURS);
        assert_eq!(hits[0], "three");

        let two = query(&embedding, &built.index, &texts[..2], "one", 5)
            .await
            .expect("ok");
        assert_eq!(two.len(), 2);
    }
}
