use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::categorizer::{eligibility_confidence, Classifier};
use crate::db::{ClaimTicket, JobRepository};
use crate::fields::FieldExtractor;
use crate::hashing::detail_content_hash;
use crate::processor::extractor::AttachmentTextExtractor;
use crate::program::FundingProgram;
use crate::sanitize::redact_url;
use crate::source::{parse_detail_page, SourceFetcher};
use crate::worker::job::{DetailPageData, Job, JobReport, ProcessingStatus};

use super::config::PipelineConfig;
use super::context::{PipelineContext, PipelineWarning};
use super::error::{PipelineError, ResetError};
use super::state::{next_status, InvalidTransition, JobEvent};

/// Result of trying to take a job.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(Job),
    /// Someone else holds it, it is not PENDING, or it is still backing off.
    Busy,
}

/// How a run ended before the outcome is written back.
enum Outcome {
    Completed,
    Skipped(String),
}

const CLAIM_EXPIRED: &str = "claim expired";

/// Drives jobs through their lifecycle against an injected repository.
///
/// Every write made on behalf of a claimed job is guarded by the claim's
/// [`ClaimTicket`]; once an operator reset or a stale reclaim has taken the
/// job away, the worker's late writes are dropped.
pub struct JobStateMachine {
    repo: Arc<dyn JobRepository>,
    source: Arc<dyn SourceFetcher>,
    extractor: AttachmentTextExtractor,
    field_extractor: FieldExtractor,
    classifier: Classifier,
    config: PipelineConfig,
    worker_id: String,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl JobStateMachine {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        source: Arc<dyn SourceFetcher>,
        extractor: AttachmentTextExtractor,
        classifier: Classifier,
        config: PipelineConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        let field_extractor = FieldExtractor::new().with_budget_window(config.budget_window_chars);
        Self {
            repo,
            source,
            extractor,
            field_extractor,
            classifier,
            config,
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    /// Atomically moves a PENDING job to PROCESSING under this worker.
    pub fn claim(&self, job_id: &str) -> Result<ClaimOutcome, PipelineError> {
        match self.repo.try_claim(job_id, &self.worker_id, Utc::now())? {
            Some(job) => {
                debug!(job_id = %job.id, worker = %self.worker_id, "Claimed job");
                Ok(ClaimOutcome::Claimed(job))
            }
            None => Ok(ClaimOutcome::Busy),
        }
    }

    /// Claims and runs a job. `None` when the claim was lost to another worker.
    pub async fn claim_and_run(&self, job_id: &str) -> Result<Option<JobReport>, PipelineError> {
        match self.claim(job_id)? {
            ClaimOutcome::Claimed(job) => Ok(Some(self.run(job).await)),
            ClaimOutcome::Busy => Ok(None),
        }
    }

    /// Runs the whole pipeline over a claimed job and writes the outcome back.
    pub async fn run(&self, job: Job) -> JobReport {
        let Some(ticket) = ClaimTicket::of(&job) else {
            warn!(job_id = %job.id, status = %job.status, "Refusing to run an unclaimed job");
            return JobReport::from_job(&job, false);
        };

        let span = info_span!(
            "pipeline",
            job_id = %job.id,
            url = %redact_url(&job.source_url),
            worker = %self.worker_id,
        );

        async move {
            let mut ctx = PipelineContext::new(job, ticket);
            match self.execute(&mut ctx).await {
                Ok(Outcome::Completed) => self.finish(ctx, JobEvent::Complete, None),
                Ok(Outcome::Skipped(reason)) => self.finish(ctx, JobEvent::Skip, Some(reason)),
                Err(PipelineError::OwnershipLost(_)) => {
                    self.log_ownership_lost(&ctx.job);
                    JobReport::from_job(&ctx.job, true)
                }
                Err(e) if e.is_transient() => {
                    warn!("Attempt failed: {}", e);
                    self.finish(ctx, JobEvent::Fail, Some(e.to_string()))
                }
                Err(e) => self.finish(ctx, JobEvent::Skip, Some(e.to_string())),
            }
        }
        .instrument(span)
        .await
    }

    /// Ends a claimed job as SKIPPED with `reason` recorded.
    pub fn skip(&self, job: Job, reason: &str) -> Result<JobReport, PipelineError> {
        let ticket = ClaimTicket::of(&job).ok_or(InvalidTransition {
            from: job.status,
            event: JobEvent::Skip,
        })?;
        Ok(self.finish(
            PipelineContext::new(job, ticket),
            JobEvent::Skip,
            Some(reason.to_string()),
        ))
    }

    /// Operator re-queue. Works from any state and overrides in-flight
    /// claims; an empty or unknown id changes nothing.
    pub fn reset(&self, job_id: &str) -> Result<Job, ResetError> {
        let id = job_id.trim();
        if id.is_empty() {
            return Err(ResetError::EmptyId);
        }

        let job = self
            .repo
            .reset_job(id, Utc::now())?
            .ok_or_else(|| ResetError::NotFound(id.to_string()))?;
        info!(job_id = %job.id, "Job reset to pending");
        Ok(job)
    }

    /// Resets every job tagged with `batch`.
    pub fn reset_batch(&self, batch: &str) -> Result<Vec<Job>, ResetError> {
        let ids = self.repo.find_job_ids_by_batch(batch)?;
        if ids.is_empty() {
            return Err(ResetError::EmptyBatch(batch.to_string()));
        }
        ids.iter().map(|id| self.reset(id)).collect()
    }

    /// Releases PROCESSING claims older than the configured stale age. The
    /// abandoned attempt counts against the retry ceiling.
    pub fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<Vec<JobReport>, PipelineError> {
        let cutoff = before(now, self.config.stale_after);
        let mut reports = Vec::new();

        for mut job in self.repo.find_stale_jobs(cutoff)? {
            let Some(ticket) = ClaimTicket::of(&job) else {
                continue;
            };
            warn!(
                job_id = %job.id,
                worker = %ticket.worker,
                started_at = %ticket.started_at,
                "Reclaiming stale claim"
            );

            self.apply(&mut job, JobEvent::Reclaim, Some(CLAIM_EXPIRED.to_string()), now)?;
            if self.repo.save_job(&job, &ticket)? {
                reports.push(JobReport::from_job(&job, false));
            } else {
                debug!(job_id = %job.id, "Stale claim changed before it could be reclaimed");
            }
        }

        Ok(reports)
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<Outcome, PipelineError> {
        let mut detail = match ctx.job.detail_page_data.take() {
            Some(detail) => detail,
            None => self.fetch_detail(&ctx.job.source_url).await?,
        };

        let result = self.process(ctx, &mut detail).await;
        ctx.job.detail_page_data = Some(detail);
        result
    }

    async fn fetch_detail(&self, url: &str) -> Result<DetailPageData, PipelineError> {
        async {
            let html = self
                .source
                .fetch_detail(url)
                .await
                .map_err(PipelineError::DetailPage)?;
            parse_detail_page(&html, url).map_err(PipelineError::DetailPage)
        }
        .instrument(info_span!("fetch_detail"))
        .await
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        detail: &mut DetailPageData,
    ) -> Result<Outcome, PipelineError> {
        let min_chars = self.config.min_text_length;

        if detail.attachments.is_empty() && !detail.has_usable_text(min_chars) {
            return Ok(Outcome::Skipped(
                "no attachments and no usable detail text".to_string(),
            ));
        }

        // Step 1: content hash and duplicate check
        let hash = detail_content_hash(detail);
        ctx.job.content_hash = Some(hash.clone());
        if let Some(existing) = self.repo.find_program_by_content_hash(&hash)? {
            if existing.job_id != ctx.job.id {
                info!(
                    program_id = %existing.id,
                    original_job = %existing.job_id,
                    "Duplicate announcement, linking existing program"
                );
                ctx.job.funding_program_id = Some(existing.id);
                return Ok(Outcome::Completed);
            }
        }

        // Step 2: attachment text
        let count = detail.attachments.len();
        self.step_extract_attachments(ctx, detail)
            .instrument(info_span!("extract_attachments", count))
            .await?;

        if detail.recovered_attachment_count() == 0 && !detail.has_usable_text(min_chars) {
            return Ok(Outcome::Skipped(
                "no usable text recovered from detail page or attachments".to_string(),
            ));
        }

        // Step 3: fields and classification
        let text = detail.combined_text();
        let fields = info_span!("extract_fields").in_scope(|| self.field_extractor.extract(&text));
        let classification = info_span!("classify").in_scope(|| self.classifier.classify(detail));
        let eligibility = eligibility_confidence(&fields, &classification);

        // Step 4: program record
        let program =
            FundingProgram::assemble(&ctx.job, detail, &fields, &classification, eligibility);
        self.repo.upsert_funding_program(&program)?;
        debug!(
            program_id = %program.id,
            category = %program.category,
            eligibility = program.eligibility_confidence.as_str(),
            "Funding program stored"
        );

        ctx.job.funding_program_id = Some(program.id);
        ctx.fields = Some(fields);
        ctx.classification = Some(classification);
        Ok(Outcome::Completed)
    }

    async fn step_extract_attachments(
        &self,
        ctx: &mut PipelineContext,
        detail: &mut DetailPageData,
    ) -> Result<(), PipelineError> {
        for attachment in detail.attachments.iter_mut() {
            if attachment.extracted_text.is_some() {
                debug!("Using cached text for {}", attachment.filename);
                continue;
            }

            let bytes = match self.source.fetch_attachment(&attachment.url).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_transient() => return Err(PipelineError::Attachment(e)),
                Err(e) => {
                    warn!("Giving up on attachment {}: {}", attachment.filename, e);
                    ctx.warnings.push(PipelineWarning::AttachmentUnavailable {
                        filename: attachment.filename.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match self.extractor.extract(&attachment.filename, &bytes).await? {
                Some(recovered) => {
                    info!(
                        filename = %attachment.filename,
                        strategy = %recovered.strategy,
                        chars = recovered.text.chars().count(),
                        "Recovered attachment text"
                    );
                    attachment.extracted_text = Some(recovered.text);
                }
                None => {
                    ctx.warnings.push(PipelineWarning::NoTextRecovered {
                        filename: attachment.filename.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Applies a lifecycle event to the in-memory job, including retry
    /// bookkeeping.
    fn apply(
        &self,
        job: &mut Job,
        event: JobEvent,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        let attempts = match event {
            JobEvent::Fail | JobEvent::Reclaim => job.processing_attempts + 1,
            _ => job.processing_attempts,
        };
        let status = next_status(
            job.status,
            event,
            attempts,
            self.config.retry.max_attempts,
        )?;

        job.status = status;
        job.processing_attempts = attempts;
        job.processing_error = error;
        job.updated_at = now;

        if status == ProcessingStatus::Pending {
            let delay = self.config.retry.backoff(attempts);
            job.next_attempt_at = Some(after(now, delay));
            job.processed_at = None;
        } else if status.is_terminal() {
            job.next_attempt_at = None;
            job.processed_at = Some(now);
        }

        Ok(())
    }

    fn finish(&self, ctx: PipelineContext, event: JobEvent, error: Option<String>) -> JobReport {
        let PipelineContext {
            mut job,
            ticket,
            fields,
            classification,
            warnings,
        } = ctx;
        let category = classification.as_ref().map(|c| c.category);

        if let Err(e) = self.apply(&mut job, event, error, Utc::now()) {
            error!(job_id = %job.id, "{}", e);
            return JobReport::from_job(&job, false);
        }

        match self.repo.save_job(&job, &ticket) {
            Ok(true) => {
                match job.status {
                    ProcessingStatus::Completed => info!(
                        program_id = job.funding_program_id.as_deref().unwrap_or(""),
                        category = ?category,
                        confidence = ?classification.as_ref().map(|c| c.confidence),
                        budget_found = fields.as_ref().is_some_and(|f| f.budget.is_found()),
                        deadline_found = fields.as_ref().is_some_and(|f| f.deadline.is_found()),
                        warnings = warnings.len(),
                        "Job completed"
                    ),
                    ProcessingStatus::Pending => info!(
                        attempts = job.processing_attempts,
                        next_attempt_at = ?job.next_attempt_at,
                        "Job scheduled for retry"
                    ),
                    status => warn!(
                        status = %status,
                        reason = job.processing_error.as_deref().unwrap_or(""),
                        "Job finished without a program"
                    ),
                }
                let mut report = JobReport::from_job(&job, false);
                if job.status == ProcessingStatus::Completed {
                    report.category = category;
                }
                report
            }
            Ok(false) => {
                self.log_ownership_lost(&job);
                JobReport::from_job(&job, true)
            }
            Err(e) => {
                // The claim stays in place and is reclaimed once it goes stale.
                error!(job_id = %job.id, "Failed to persist job outcome: {}", e);
                let mut report = JobReport::from_job(&job, false);
                report.error = Some(e.to_string());
                report
            }
        }
    }

    fn log_ownership_lost(&self, job: &Job) {
        warn!(
            job_id = %job.id,
            worker = %self.worker_id,
            "Lost ownership of job; discarding this run's result"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::error::SourceError;
    use crate::worker::job::Attachment;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BODY: &str = "본 사업은 수소 연료전지 실증을 지원합니다. 정부출연금은 과제당 5억원 이내이며 \
        지원대상은 중소기업입니다. 접수마감: 2024년 4월 30일. 기술성숙도 TRL 4~6 단계 과제를 지원합니다.";

    #[derive(Default)]
    struct StubSource {
        pages: HashMap<String, String>,
        files: HashMap<String, Vec<u8>>,
        detail_calls: AtomicUsize,
        attachment_calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for StubSource {
        async fn fetch_detail(&self, url: &str) -> Result<String, SourceError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            self.pages.get(url).cloned().ok_or(SourceError::Status {
                url: url.to_string(),
                status: 503,
            })
        }

        async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, SourceError> {
            self.attachment_calls.fetch_add(1, Ordering::SeqCst);
            self.files.get(url).cloned().ok_or(SourceError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn machine(repo: Arc<MemoryRepository>, source: StubSource) -> JobStateMachine {
        JobStateMachine::new(
            repo,
            Arc::new(source),
            AttachmentTextExtractor::new(None, 100),
            Classifier::default(),
            PipelineConfig::default(),
            "worker-test",
        )
    }

    fn detail_with_text() -> DetailPageData {
        DetailPageData {
            title: "2024년 수소 연료전지 실증 지원사업".to_string(),
            ministry: Some("산업통상자원부".to_string()),
            agency: Some("한국에너지기술평가원".to_string()),
            description: BODY.to_string(),
            attachments: vec![],
        }
    }

    fn claimed(repo: &MemoryRepository, job: Job) -> Job {
        repo.insert_job(&job).unwrap();
        repo.try_claim(&job.id, "worker-test", Utc::now())
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_completes_with_detail_text_only() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo.clone(), StubSource::default());
        let job = claimed(&repo, Job::with_detail("https://example.go.kr/1", detail_with_text()));

        let report = sm.run(job).await;
        assert!(report.success(), "{:?}", report.error);
        assert_eq!(
            report.category,
            Some(crate::program::IndustryCategory::Energy)
        );

        let program_id = report.funding_program_id.unwrap();
        let program = repo.find_program(&program_id).unwrap().unwrap();
        assert_eq!(program.budget_amount, Some(500_000_000));
        assert_eq!(program.min_trl, Some(4));
        assert_eq!(program.max_trl, Some(6));
    }

    #[tokio::test]
    async fn test_empty_page_is_skipped() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo.clone(), StubSource::default());
        let detail = DetailPageData {
            title: "공고".to_string(),
            ..Default::default()
        };
        let job = claimed(&repo, Job::with_detail("https://example.go.kr/1", detail));

        let report = sm.run(job).await;
        assert_eq!(report.status, ProcessingStatus::Skipped);
        assert!(report.error.unwrap().contains("no attachments"));
        assert_eq!(report.attempts, 0);
    }

    #[tokio::test]
    async fn test_detail_fetch_failure_retries_with_backoff() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo.clone(), StubSource::default());
        let job = claimed(&repo, Job::new("https://example.go.kr/missing"));

        let report = sm.run(job).await;
        assert_eq!(report.status, ProcessingStatus::Pending);
        assert_eq!(report.attempts, 1);

        let stored = repo.find_job(&report.job_id).unwrap().unwrap();
        assert!(stored.next_attempt_at.unwrap() > Utc::now());
        assert!(stored.processing_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_missing_attachment_is_not_fatal() {
        let repo = Arc::new(MemoryRepository::new());
        let source = StubSource::default();
        let mut detail = detail_with_text();
        detail
            .attachments
            .push(Attachment::new("https://example.go.kr/gone.hwp", "gone.hwp"));
        let sm = machine(repo.clone(), source);
        let job = claimed(&repo, Job::with_detail("https://example.go.kr/1", detail));

        let report = sm.run(job).await;
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_attachment_text_is_cached_on_job() {
        let repo = Arc::new(MemoryRepository::new());
        let mut source = StubSource::default();
        source.files.insert(
            "https://example.go.kr/a.txt".to_string(),
            BODY.repeat(2).into_bytes(),
        );
        let mut detail = detail_with_text();
        detail.description = "붙임 참조".to_string();
        detail
            .attachments
            .push(Attachment::new("https://example.go.kr/a.txt", "공고문.txt"));
        let sm = machine(repo.clone(), source);
        let job = claimed(&repo, Job::with_detail("https://example.go.kr/1", detail));

        let report = sm.run(job).await;
        assert!(report.success(), "{:?}", report.error);

        let stored = repo.find_job(&report.job_id).unwrap().unwrap();
        let detail = stored.detail_page_data.unwrap();
        assert!(detail.attachments[0].extracted_text.is_some());
        assert!(stored.content_hash.is_some());
    }

    #[tokio::test]
    async fn test_reset_during_run_discards_result() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo.clone(), StubSource::default());
        let job = claimed(&repo, Job::with_detail("https://example.go.kr/1", detail_with_text()));

        sm.reset(&job.id).unwrap();
        let report = sm.run(job).await;
        assert!(report.ownership_lost);

        let stored = repo.find_job(&report.job_id).unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_reset_rejects_bad_ids() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo, StubSource::default());
        assert!(matches!(sm.reset("  "), Err(ResetError::EmptyId)));
        assert!(matches!(sm.reset("nope"), Err(ResetError::NotFound(_))));
        assert!(matches!(sm.reset_batch("2024-01"), Err(ResetError::EmptyBatch(_))));
    }

    #[test]
    fn test_skip_requires_claim() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo.clone(), StubSource::default());
        let job = Job::new("https://example.go.kr/1");
        repo.insert_job(&job).unwrap();
        assert!(matches!(
            sm.skip(job, "manual"),
            Err(PipelineError::Transition(_))
        ));
    }

    #[test]
    fn test_reclaim_counts_attempt() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo.clone(), StubSource::default());
        let job = Job::new("https://example.go.kr/1");
        repo.insert_job(&job).unwrap();
        let long_ago = Utc::now() - chrono::Duration::hours(3);
        repo.try_claim(&job.id, "dead-worker", long_ago).unwrap().unwrap();

        let reports = sm.reclaim_stale(Utc::now()).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, ProcessingStatus::Pending);
        assert_eq!(reports[0].attempts, 1);
        assert_eq!(reports[0].error.as_deref(), Some(CLAIM_EXPIRED));
    }

    #[test]
    fn test_fresh_claims_are_not_reclaimed() {
        let repo = Arc::new(MemoryRepository::new());
        let sm = machine(repo.clone(), StubSource::default());
        let job = Job::new("https://example.go.kr/1");
        repo.insert_job(&job).unwrap();
        repo.try_claim(&job.id, "busy-worker", Utc::now()).unwrap().unwrap();

        assert!(sm.reclaim_stale(Utc::now()).unwrap().is_empty());
    }
}
