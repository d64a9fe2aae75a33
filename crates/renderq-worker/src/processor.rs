//! Job processor state machine.
//!
//! Drives one render job from asset upload through completion notification:
//! upload inputs, submit the workflow, poll history with a bounded attempt
//! budget, locate the output artifact, notify.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use renderq_comfy::{ComfyApi, HistoryEntry};
use renderq_models::{JobId, RenderJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::notifier::CompletionNotifier;

/// Process a single render job to completion.
///
/// Uploads and submission are never retried here: a duplicate submission
/// would orphan a second remote job. Polling is read-only and therefore
/// bounded-retried at a fixed interval. On success, returns the storage key
/// the artifact was delivered under.
pub async fn process_job<C, N>(
    client: &C,
    notifier: &N,
    job: &RenderJob,
    config: &WorkerConfig,
) -> WorkerResult<String>
where
    C: ComfyApi + ?Sized,
    N: CompletionNotifier + ?Sized,
{
    info!("Processing job {}", job.job_id);

    // Uploads are a precondition for submission; the first failure aborts.
    for asset in &job.input_assets {
        client
            .upload_asset(&asset.name, &asset.content_base64)
            .await
            .map_err(|e| WorkerError::UploadFailed {
                job_id: job.job_id.clone(),
                asset: asset.name.clone(),
                message: e.to_string(),
            })?;
        debug!("Uploaded asset '{}' for job {}", asset.name, job.job_id);
    }

    let prompt = client
        .submit_workflow(&job.workflow)
        .await
        .map_err(|e| WorkerError::SubmissionFailed {
            job_id: job.job_id.clone(),
            message: e.to_string(),
        })?;
    if prompt.prompt_id.is_empty() {
        return Err(WorkerError::SubmissionFailed {
            job_id: job.job_id.clone(),
            message: "service returned an empty prompt id".to_string(),
        });
    }
    info!("Job {} submitted as prompt {}", job.job_id, prompt.prompt_id);

    let record = poll_until_completed(client, &job.job_id, &prompt.prompt_id, config).await?;

    let artifact_path = locate_output(
        &record,
        &job.output_node_id,
        &config.output_base_path,
        &job.job_id,
    )?;

    let key = notifier.notify(&job.job_id, &artifact_path).await?;
    info!("Job {} completed, artifact delivered as {}", job.job_id, key);
    Ok(key)
}

/// Poll the history endpoint until the record reports completion.
///
/// A missing record and an incomplete record are normal not-ready signals.
/// A fetch error is swallowed and costs one attempt, except on the final
/// attempt where it becomes the terminating failure; with a budget of one
/// attempt, any error is terminal.
async fn poll_until_completed<C>(
    client: &C,
    job_id: &JobId,
    prompt_id: &str,
    config: &WorkerConfig,
) -> WorkerResult<HistoryEntry>
where
    C: ComfyApi + ?Sized,
{
    let max_attempts = config.max_poll_attempts.max(1);

    for attempt in 1..=max_attempts {
        let final_attempt = attempt == max_attempts;

        match client.fetch_history(prompt_id).await {
            Ok(Some(record)) if record.is_completed() => {
                debug!(
                    "Job {} completed on poll attempt {}/{}",
                    job_id, attempt, max_attempts
                );
                return Ok(record);
            }
            Ok(_) => {
                debug!(
                    "Job {} not ready on poll attempt {}/{}",
                    job_id, attempt, max_attempts
                );
            }
            Err(e) if final_attempt => {
                return Err(WorkerError::PollFailed {
                    job_id: job_id.clone(),
                    attempt,
                    source: e,
                });
            }
            Err(e) => {
                warn!(
                    "Job {} poll attempt {}/{} failed, continuing: {}",
                    job_id, attempt, max_attempts, e
                );
            }
        }

        if !final_attempt {
            tokio::time::sleep(config.poll_interval).await;
        }
    }

    Err(WorkerError::PollTimeout {
        job_id: job_id.clone(),
        attempts: max_attempts,
    })
}

/// Resolve the artifact path for the requested output node.
///
/// Always selects the first reported image; callers wanting a different
/// selection policy must pre-filter the record.
pub fn locate_output(
    record: &HistoryEntry,
    output_node_id: &str,
    output_base_path: &Path,
    job_id: &JobId,
) -> WorkerResult<PathBuf> {
    let images = record
        .outputs
        .get(output_node_id)
        .and_then(|node| node.images.as_deref())
        .unwrap_or_default();

    let Some(video) = images.first() else {
        return Err(WorkerError::NoVideoOutput {
            job_id: job_id.clone(),
            node_id: output_node_id.to_string(),
        });
    };

    if video.filename.is_empty() {
        return Err(WorkerError::MissingFilename {
            job_id: job_id.clone(),
            node_id: output_node_id.to_string(),
        });
    }

    let mut path = output_base_path.to_path_buf();
    if !video.subfolder.is_empty() {
        path.push(&video.subfolder);
    }
    path.push(&video.filename);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use renderq_comfy::{
        ComfyError, ComfyResult, HistoryStatus, ImageInfo, NodeOutput, PromptResponse,
    };
    use renderq_models::InputAsset;

    fn test_config(max_poll_attempts: u32) -> WorkerConfig {
        WorkerConfig {
            output_base_path: PathBuf::from("/out"),
            max_poll_attempts,
            poll_interval: Duration::from_millis(1),
            ..WorkerConfig::default()
        }
    }

    fn entry(completed: bool, outputs: HashMap<String, NodeOutput>) -> HistoryEntry {
        HistoryEntry {
            outputs,
            status: HistoryStatus {
                status_str: if completed { "success" } else { "running" }.to_string(),
                completed,
            },
        }
    }

    fn video_node(filename: &str, subfolder: &str) -> NodeOutput {
        NodeOutput {
            images: Some(vec![ImageInfo {
                filename: filename.to_string(),
                subfolder: subfolder.to_string(),
                output_type: "output".to_string(),
            }]),
        }
    }

    fn completed_entry(node_id: &str, filename: &str, subfolder: &str) -> HistoryEntry {
        let mut outputs = HashMap::new();
        outputs.insert(node_id.to_string(), video_node(filename, subfolder));
        entry(true, outputs)
    }

    /// Scripted compute service double. Poll results are consumed in order;
    /// once exhausted, every further fetch reports "no record yet".
    struct FakeComfy {
        uploaded: Mutex<Vec<String>>,
        fail_upload_on: Option<String>,
        prompt_id: Option<String>,
        polls: Mutex<VecDeque<ComfyResult<Option<HistoryEntry>>>>,
        fetch_count: AtomicU32,
        submitted: AtomicBool,
    }

    impl FakeComfy {
        fn new(prompt_id: &str, polls: Vec<ComfyResult<Option<HistoryEntry>>>) -> Self {
            Self {
                uploaded: Mutex::new(Vec::new()),
                fail_upload_on: None,
                prompt_id: Some(prompt_id.to_string()),
                polls: Mutex::new(polls.into_iter().collect()),
                fetch_count: AtomicU32::new(0),
                submitted: AtomicBool::new(false),
            }
        }

        fn fetches(&self) -> u32 {
            self.fetch_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ComfyApi for FakeComfy {
        async fn upload_asset(&self, name: &str, _content_base64: &str) -> ComfyResult<()> {
            self.uploaded.lock().unwrap().push(name.to_string());
            if self.fail_upload_on.as_deref() == Some(name) {
                return Err(ComfyError::request_failed("connection reset"));
            }
            Ok(())
        }

        async fn submit_workflow(
            &self,
            _workflow: &serde_json::Value,
        ) -> ComfyResult<PromptResponse> {
            self.submitted.store(true, Ordering::SeqCst);
            match &self.prompt_id {
                Some(id) => Ok(PromptResponse {
                    prompt_id: id.clone(),
                    number: 1,
                    node_errors: HashMap::new(),
                }),
                None => Err(ComfyError::api_status(500, "submission rejected")),
            }
        }

        async fn fetch_history(&self, _prompt_id: &str) -> ComfyResult<Option<HistoryEntry>> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.polls.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    struct FakeNotifier {
        notified: Mutex<Vec<(JobId, PathBuf)>>,
        fail: bool,
    }

    impl FakeNotifier {
        fn new() -> Self {
            Self {
                notified: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                notified: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl CompletionNotifier for FakeNotifier {
        async fn notify(&self, job_id: &JobId, artifact_path: &Path) -> WorkerResult<String> {
            self.notified
                .lock()
                .unwrap()
                .push((job_id.clone(), artifact_path.to_path_buf()));
            if self.fail {
                return Err(WorkerError::notify_failed(job_id, "webhook returned 503"));
            }
            Ok("delivered-key.mp4".to_string())
        }
    }

    fn render_job() -> RenderJob {
        RenderJob::new(json!({"3": {"class_type": "KSampler"}}), "9")
    }

    #[tokio::test]
    async fn completes_with_single_fetch_when_record_is_ready() {
        let comfy = FakeComfy::new("p-1", vec![Ok(Some(completed_entry("9", "out.mp4", "")))]);
        let notifier = FakeNotifier::new();

        let key = process_job(&comfy, &notifier, &render_job(), &test_config(5))
            .await
            .expect("job succeeds");

        assert_eq!(key, "delivered-key.mp4");
        assert_eq!(comfy.fetches(), 1);
        let notified = notifier.notified.lock().unwrap();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].1, PathBuf::from("/out/out.mp4"));
    }

    #[tokio::test]
    async fn polls_exactly_k_times_when_completion_arrives_on_attempt_k() {
        let comfy = FakeComfy::new(
            "p-1",
            vec![
                Ok(None),
                Ok(Some(entry(false, HashMap::new()))),
                Ok(Some(completed_entry("9", "out.mp4", "videos"))),
            ],
        );
        let notifier = FakeNotifier::new();

        process_job(&comfy, &notifier, &render_job(), &test_config(10))
            .await
            .expect("job succeeds");

        assert_eq!(comfy.fetches(), 3);
        assert_eq!(
            notifier.notified.lock().unwrap()[0].1,
            PathBuf::from("/out/videos/out.mp4")
        );
    }

    #[tokio::test]
    async fn exhausting_the_attempt_budget_is_a_poll_timeout() {
        let comfy = FakeComfy::new("p-1", vec![]);
        let notifier = FakeNotifier::new();
        let job = render_job();

        let err = process_job(&comfy, &notifier, &job, &test_config(4))
            .await
            .expect_err("job times out");

        assert_eq!(comfy.fetches(), 4);
        match err {
            WorkerError::PollTimeout { job_id, attempts } => {
                assert_eq!(job_id, job.job_id);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(notifier.notified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_fetch_error_before_the_final_attempt_is_swallowed() {
        let comfy = FakeComfy::new(
            "p-1",
            vec![
                Err(ComfyError::request_failed("connection refused")),
                Ok(Some(completed_entry("9", "out.mp4", ""))),
            ],
        );
        let notifier = FakeNotifier::new();

        process_job(&comfy, &notifier, &render_job(), &test_config(3))
            .await
            .expect("job recovers");

        assert_eq!(comfy.fetches(), 2);
    }

    #[tokio::test]
    async fn transient_fetch_error_on_the_final_attempt_terminates_the_job() {
        let comfy = FakeComfy::new(
            "p-1",
            vec![
                Ok(None),
                Err(ComfyError::request_failed("connection refused")),
            ],
        );
        let notifier = FakeNotifier::new();

        let err = process_job(&comfy, &notifier, &render_job(), &test_config(2))
            .await
            .expect_err("final error surfaces");

        assert_eq!(comfy.fetches(), 2);
        assert!(matches!(err, WorkerError::PollFailed { attempt: 2, .. }));
    }

    #[tokio::test]
    async fn with_a_single_attempt_any_fetch_error_is_terminal() {
        let comfy = FakeComfy::new(
            "p-1",
            vec![Err(ComfyError::request_failed("connection refused"))],
        );
        let notifier = FakeNotifier::new();

        let err = process_job(&comfy, &notifier, &render_job(), &test_config(1))
            .await
            .expect_err("error is terminal");

        assert_eq!(comfy.fetches(), 1);
        assert!(matches!(err, WorkerError::PollFailed { attempt: 1, .. }));
    }

    #[tokio::test]
    async fn upload_failure_aborts_before_submission() {
        let mut comfy = FakeComfy::new("p-1", vec![]);
        comfy.fail_upload_on = Some("b.png".to_string());
        let notifier = FakeNotifier::new();
        let job = render_job().with_input_assets(vec![
            InputAsset::new("a.png", "aGVsbG8="),
            InputAsset::new("b.png", "aGVsbG8="),
            InputAsset::new("c.png", "aGVsbG8="),
        ]);

        let err = process_job(&comfy, &notifier, &job, &test_config(3))
            .await
            .expect_err("upload fails");

        assert!(matches!(err, WorkerError::UploadFailed { ref asset, .. } if asset == "b.png"));
        assert!(!comfy.submitted.load(Ordering::SeqCst));
        assert_eq!(comfy.fetches(), 0);
        // The failing asset stops the sequence; "c.png" is never attempted.
        assert_eq!(*comfy.uploaded.lock().unwrap(), vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn rejected_submission_is_fatal_without_polling() {
        let mut comfy = FakeComfy::new("p-1", vec![]);
        comfy.prompt_id = None;
        let notifier = FakeNotifier::new();

        let err = process_job(&comfy, &notifier, &render_job(), &test_config(3))
            .await
            .expect_err("submission fails");

        assert!(matches!(err, WorkerError::SubmissionFailed { .. }));
        assert_eq!(comfy.fetches(), 0);
    }

    #[tokio::test]
    async fn empty_prompt_id_is_a_submission_failure() {
        let comfy = FakeComfy::new("", vec![Ok(Some(completed_entry("9", "out.mp4", "")))]);
        let notifier = FakeNotifier::new();

        let err = process_job(&comfy, &notifier, &render_job(), &test_config(3))
            .await
            .expect_err("empty prompt id rejected");

        assert!(matches!(err, WorkerError::SubmissionFailed { .. }));
        assert_eq!(comfy.fetches(), 0);
    }

    #[tokio::test]
    async fn locate_failure_skips_notification() {
        // Completed record, but the requested node is absent.
        let comfy = FakeComfy::new("p-1", vec![Ok(Some(entry(true, HashMap::new())))]);
        let notifier = FakeNotifier::new();

        let err = process_job(&comfy, &notifier, &render_job(), &test_config(3))
            .await
            .expect_err("locate fails");

        assert!(matches!(err, WorkerError::NoVideoOutput { ref node_id, .. } if node_id == "9"));
        assert!(notifier.notified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notify_failure_propagates() {
        let comfy = FakeComfy::new("p-1", vec![Ok(Some(completed_entry("9", "out.mp4", "")))]);
        let notifier = FakeNotifier::failing();

        let err = process_job(&comfy, &notifier, &render_job(), &test_config(3))
            .await
            .expect_err("notify fails");

        assert!(matches!(err, WorkerError::NotifyFailed { .. }));
    }

    mod locate {
        use super::*;

        fn job_id() -> JobId {
            JobId::from_string("j-1")
        }

        #[test]
        fn joins_subfolder_between_base_and_filename() {
            let record = completed_entry("9", "out.mp4", "videos");
            let path = locate_output(&record, "9", Path::new("/out"), &job_id())
                .expect("locates artifact");
            assert_eq!(path, PathBuf::from("/out/videos/out.mp4"));
        }

        #[test]
        fn empty_subfolder_is_not_prefixed() {
            let record = completed_entry("9", "out.mp4", "");
            let path = locate_output(&record, "9", Path::new("/out"), &job_id())
                .expect("locates artifact");
            assert_eq!(path, PathBuf::from("/out/out.mp4"));
        }

        #[test]
        fn is_deterministic() {
            let record = completed_entry("9", "out.mp4", "videos");
            let first = locate_output(&record, "9", Path::new("/out"), &job_id()).unwrap();
            let second = locate_output(&record, "9", Path::new("/out"), &job_id()).unwrap();
            assert_eq!(first, second);
        }

        #[test]
        fn absent_node_is_no_video_output() {
            let record = entry(true, HashMap::new());
            let err = locate_output(&record, "9", Path::new("/out"), &job_id())
                .expect_err("node missing");
            assert!(matches!(err, WorkerError::NoVideoOutput { .. }));
        }

        #[test]
        fn node_without_images_is_no_video_output() {
            let mut outputs = HashMap::new();
            outputs.insert("9".to_string(), NodeOutput { images: None });
            let record = entry(true, outputs);
            let err = locate_output(&record, "9", Path::new("/out"), &job_id())
                .expect_err("images absent");
            assert!(matches!(err, WorkerError::NoVideoOutput { .. }));
        }

        #[test]
        fn empty_images_is_no_video_output() {
            let mut outputs = HashMap::new();
            outputs.insert(
                "9".to_string(),
                NodeOutput {
                    images: Some(Vec::new()),
                },
            );
            let record = entry(true, outputs);
            let err = locate_output(&record, "9", Path::new("/out"), &job_id())
                .expect_err("images empty");
            assert!(matches!(err, WorkerError::NoVideoOutput { .. }));
        }

        #[test]
        fn empty_first_filename_fails_even_with_valid_later_entries() {
            let mut outputs = HashMap::new();
            outputs.insert(
                "9".to_string(),
                NodeOutput {
                    images: Some(vec![
                        ImageInfo {
                            filename: String::new(),
                            subfolder: String::new(),
                            output_type: "output".to_string(),
                        },
                        ImageInfo {
                            filename: "valid.mp4".to_string(),
                            subfolder: String::new(),
                            output_type: "output".to_string(),
                        },
                    ]),
                },
            );
            let record = entry(true, outputs);
            let err = locate_output(&record, "9", Path::new("/out"), &job_id())
                .expect_err("first filename empty");
            assert!(matches!(err, WorkerError::MissingFilename { .. }));
        }

        #[test]
        fn wire_record_without_filename_is_missing_filename() {
            // The history payload can omit the filename entirely; that must
            // surface as a missing filename, not a decode failure upstream.
            let record: HistoryEntry = serde_json::from_value(serde_json::json!({
                "outputs": {
                    "9": {"images": [{"subfolder": "videos", "type": "output"}]}
                },
                "status": {"status_str": "success", "completed": true}
            }))
            .expect("record decodes");

            let err = locate_output(&record, "9", Path::new("/out"), &job_id())
                .expect_err("filename absent");
            assert!(matches!(err, WorkerError::MissingFilename { .. }));
        }
    }
}
