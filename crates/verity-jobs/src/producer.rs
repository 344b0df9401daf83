//! Producer side: creating job records and pushing descriptors.
//!
//! The web tier normally does this; the helpers here exist for local
//! end-to-end runs and tests.

use chrono::Utc;
use tracing::info;

use verity_core::defaults::REPORT_FILENAME;
use verity_core::{
    join_object_path, JobDescriptor, JobRecordStore, Manifest, ObjectStorage, QueueBackend,
    Result,
};

/// Who a new job belongs to and where its objects live.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub user_id: String,
    pub user_email: String,
    pub bucket: String,
}

/// Build the descriptor for `job_id` using the `users/{user}/jobs/{job}/`
/// object layout.
pub fn descriptor_for(request: &EnqueueRequest, job_id: &str) -> JobDescriptor {
    let root = format!("users/{}/jobs/{}", request.user_id, job_id);
    JobDescriptor {
        job_id: job_id.to_string(),
        user_id: request.user_id.clone(),
        user_email: request.user_email.clone(),
        bucket: request.bucket.clone(),
        input_prefix: format!("{}/input/", root),
        manifest_path: join_object_path(&root, "manifest.json"),
        report_prefix: format!("{}/report/", root),
        report_filename: REPORT_FILENAME.to_string(),
        created_at: Utc::now(),
    }
}

/// Upload input images and their manifest for a descriptor.
pub async fn upload_inputs(
    storage: &dyn ObjectStorage,
    job: &JobDescriptor,
    images: Vec<(String, Vec<u8>)>,
) -> Result<Manifest> {
    let mut names = Vec::with_capacity(images.len());
    for (name, bytes) in images {
        let content_type = infer::get(&bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream");
        storage
            .upload(&job.bucket, &job.input_path(&name), bytes, content_type)
            .await?;
        names.push(name);
    }

    let manifest = Manifest {
        total_images: Some(names.len()),
        images: names,
        job_id: Some(job.job_id.clone()),
        user_id: Some(job.user_id.clone()),
        created_at: Some(job.created_at.to_rfc3339()),
    };
    storage
        .upload(
            &job.bucket,
            &job.manifest_path,
            serde_json::to_vec(&manifest)?,
            "application/json",
        )
        .await?;
    Ok(manifest)
}

/// Create the QUEUED record and push the descriptor onto the ready tail.
pub async fn enqueue(
    queue: &dyn QueueBackend,
    store: &dyn JobRecordStore,
    ready_queue: &str,
    request: &EnqueueRequest,
) -> Result<JobDescriptor> {
    let job_id = store.create_job(&request.user_id).await?;
    let job = descriptor_for(request, &job_id);
    push(queue, ready_queue, &job).await?;
    Ok(job)
}

/// Like [`enqueue`], but uploads `images` before the descriptor becomes
/// visible to consumers.
pub async fn submit_job(
    queue: &dyn QueueBackend,
    store: &dyn JobRecordStore,
    storage: &dyn ObjectStorage,
    ready_queue: &str,
    request: &EnqueueRequest,
    images: Vec<(String, Vec<u8>)>,
) -> Result<JobDescriptor> {
    let job_id = store.create_job(&request.user_id).await?;
    let job = descriptor_for(request, &job_id);
    upload_inputs(storage, &job, images).await?;
    push(queue, ready_queue, &job).await?;
    Ok(job)
}

async fn push(queue: &dyn QueueBackend, ready_queue: &str, job: &JobDescriptor) -> Result<()> {
    queue.push_tail(ready_queue, &job.to_entry()?).await?;
    info!(
        subsystem = "jobs",
        component = "producer",
        op = "enqueue",
        job_id = %job.job_id,
        user_id = %job.user_id,
        "Job enqueued"
    );
    Ok(())
}
