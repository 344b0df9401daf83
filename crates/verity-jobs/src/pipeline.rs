//! Batch processing steps of one job attempt.
//!
//! Each step is a single call from the consumer's point of view and may
//! fail; sequencing, status updates and lease handling live in
//! [`crate::consumer`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use verity_core::defaults::{INFERENCE_BATCH_SIZE, SIGNED_URL_TTL_SECS};
use verity_core::{
    Classifier, Error, ImageResult, JobDescriptor, Manifest, Notifier, ObjectStorage,
    PreparedImage, ReportRenderer, Result,
};
use verity_inference::prepare_image;

/// External collaborators of the job pipeline, injected once at startup.
#[derive(Clone)]
pub struct BatchProcessor {
    storage: Arc<dyn ObjectStorage>,
    classifier: Arc<dyn Classifier>,
    renderer: Arc<dyn ReportRenderer>,
    notifier: Arc<dyn Notifier>,
    batch_size: usize,
    signed_url_ttl: Duration,
}

impl BatchProcessor {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        classifier: Arc<dyn Classifier>,
        renderer: Arc<dyn ReportRenderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let batch_size = INFERENCE_BATCH_SIZE.min(classifier.max_batch_size()).max(1);
        Self {
            storage,
            classifier,
            renderer,
            notifier,
            batch_size,
            signed_url_ttl: Duration::from_secs(SIGNED_URL_TTL_SECS),
        }
    }

    /// Images per inference call, never above what the classifier accepts.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.min(self.classifier.max_batch_size()).max(1);
        self
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Step 1: fetch and parse the manifest.
    pub async fn load_manifest(&self, job: &JobDescriptor) -> Result<Manifest> {
        let bytes = self.storage.download(&job.bucket, &job.manifest_path).await?;
        let manifest = Manifest::parse(&bytes)?;
        if manifest.images.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Manifest {} lists no images",
                job.manifest_path
            )));
        }
        Ok(manifest)
    }

    /// Step 2: download, prepare and classify every image in manifest order.
    #[instrument(skip_all, fields(job_id = %job.job_id, image_count = manifest.images.len()))]
    pub async fn classify_images(
        &self,
        job: &JobDescriptor,
        manifest: &Manifest,
    ) -> Result<Vec<ImageResult>> {
        let start = Instant::now();
        let mut results = Vec::with_capacity(manifest.images.len());

        for names in manifest.images.chunks(self.batch_size) {
            let batch: Vec<PreparedImage> =
                try_join_all(names.iter().map(|name| self.download_image(job, name))).await?;

            let predictions = self.classifier.classify(&batch).await?;
            if predictions.len() != batch.len() {
                return Err(Error::Inference(format!(
                    "Classifier returned {} predictions for {} images",
                    predictions.len(),
                    batch.len()
                )));
            }

            results.extend(
                names
                    .iter()
                    .zip(predictions)
                    .map(|(name, prediction)| ImageResult {
                        image: name.clone(),
                        prediction,
                    }),
            );
        }

        debug!(
            subsystem = "jobs",
            component = "pipeline",
            op = "classify",
            model = self.classifier.model_name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Images classified"
        );
        Ok(results)
    }

    async fn download_image(&self, job: &JobDescriptor, name: &str) -> Result<PreparedImage> {
        let bytes = self.storage.download(&job.bucket, &job.input_path(name)).await?;
        prepare_image(name, bytes)
    }

    /// Steps 3 and 4: render, upload, then delete the inputs.
    ///
    /// The upload overwrites, and inputs are only deleted after it
    /// succeeded, so a rerun after a crash in between still finds the
    /// inputs or at least the report.
    pub async fn publish_report(
        &self,
        job: &JobDescriptor,
        results: &[ImageResult],
    ) -> Result<String> {
        let artifact = self.renderer.render(results)?;
        let report_path = job.report_path();
        let size = artifact.bytes.len();

        self.storage
            .upload(
                &job.bucket,
                &report_path,
                artifact.bytes,
                &artifact.content_type,
            )
            .await?;
        let removed = self
            .storage
            .list_and_delete(&job.bucket, &job.input_prefix)
            .await?;

        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "publish",
            job_id = %job.job_id,
            path = %report_path,
            bytes = size,
            inputs_removed = removed,
            "Report uploaded"
        );
        Ok(report_path)
    }

    /// Step 5: time-limited download link for the report.
    pub async fn issue_link(&self, job: &JobDescriptor, report_path: &str) -> Result<String> {
        self.storage
            .signed_url(&job.bucket, report_path, self.signed_url_ttl)
            .await
    }

    /// Step 8: tell the user the report is ready.
    pub async fn notify(&self, job: &JobDescriptor, url: &str) -> Result<()> {
        self.notifier
            .send_notification(&job.user_email, &job.user_id, url)
            .await
    }
}
