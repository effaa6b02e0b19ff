//! Object storage for note images.

mod presigned;

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ImageData, ImageKey, TransferProgress};
use crate::Result;

pub use presigned::PresignedImageStore;

/// Optional progress sink for blob transfers.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Upload/download/delete of image blobs by key.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(
        &self,
        key: &ImageKey,
        image: &ImageData,
        progress: Option<ProgressCallback>,
    ) -> Result<()>;

    async fn download(
        &self,
        key: &ImageKey,
        progress: Option<ProgressCallback>,
    ) -> Result<ImageData>;

    async fn delete(&self, key: &ImageKey) -> Result<()>;
}
