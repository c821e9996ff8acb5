use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;

use crate::blob::{BlobEvent, BlobStore};
use crate::pipeline::{Envelope, PipelineError, Source};

/// One synthetic notification per object already in the store.
///
/// Used to replay landed batches through the trigger, for instance after the
/// keyed store was unreachable for longer than the retry budget.
pub struct LandedObjectsSource {
    store: Arc<dyn BlobStore>,
    prefix: Option<String>,
}

impl LandedObjectsSource {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store, prefix: None }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[async_trait::async_trait]
impl Source<BlobEvent> for LandedObjectsSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<BlobEvent>, PipelineError>> + Send>> {
        let store = self.store.clone();
        let prefix = self.prefix.clone();

        let s = try_stream! {
            let names = store.list().await.map_err(PipelineError::from)?;
            for object in names {
                if let Some(p) = &prefix {
                    if !object.starts_with(p.as_str()) {
                        continue;
                    }
                }
                yield Envelope::now(BlobEvent { object });
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{MemoryBlobStore, JSON_CONTENT_TYPE};
    use futures::StreamExt;

    #[tokio::test]
    async fn lists_every_object_matching_prefix() {
        let store = Arc::new(MemoryBlobStore::default());
        for name in ["energy_data_1.json", "energy_data_2.json", "other.json"] {
            store.put(name, b"[]".to_vec(), JSON_CONTENT_TYPE).await.unwrap();
        }

        let source = LandedObjectsSource::new(store).with_prefix("energy_data_");
        let objects: Vec<String> = source
            .stream()
            .await
            .map(|e| e.unwrap().payload.object)
            .collect()
            .await;

        assert_eq!(objects, vec!["energy_data_1.json", "energy_data_2.json"]);
    }
}
