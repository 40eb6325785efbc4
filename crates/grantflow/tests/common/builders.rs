//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use grantflow::categorizer::Classifier;
use grantflow::db::JobRepository;
use grantflow::pipeline::{JobStateMachine, PipelineConfig, RetryPolicy};
use grantflow::processor::AttachmentTextExtractor;
use grantflow::source::SourceFetcher;
use grantflow::worker::{Attachment, DetailPageData, Job};

pub const WORKER: &str = "worker-it";

/// Announcement body long enough to count as usable detail text.
pub const HYDROGEN_BODY: &str = "본 사업은 수소 연료전지 실증을 지원합니다. 정부출연금은 과제당 5억원 이내이며 \
지원대상은 중소기업 및 대학입니다. 공고일: 2024. 3. 15. 접수기간: 2024.03.18 ~ 2024.04.30 18:00. \
기술성숙도 TRL 4~6 단계 과제를 지원합니다.";

/// Builder for `DetailPageData`.
pub struct DetailBuilder {
    detail: DetailPageData,
}

impl DetailBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            detail: DetailPageData {
                title: title.to_string(),
                ..Default::default()
            },
        }
    }

    /// The hydrogen demonstration announcement used across suites.
    pub fn hydrogen() -> Self {
        Self::new("2024년 수소 연료전지 실증 지원사업")
            .ministry("산업통상자원부")
            .agency("한국에너지기술평가원")
            .description(HYDROGEN_BODY)
    }

    pub fn ministry(mut self, ministry: &str) -> Self {
        self.detail.ministry = Some(ministry.to_string());
        self
    }

    pub fn agency(mut self, agency: &str) -> Self {
        self.detail.agency = Some(agency.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.detail.description = description.to_string();
        self
    }

    pub fn attachment(mut self, url: &str, filename: &str) -> Self {
        self.detail.attachments.push(Attachment::new(url, filename));
        self
    }

    pub fn build(self) -> DetailPageData {
        self.detail
    }
}

/// Retry policy without backoff so failed jobs are claimable right away.
pub fn immediate_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

pub fn pipeline_config(max_attempts: u32) -> PipelineConfig {
    PipelineConfig {
        retry: immediate_retry(max_attempts),
        min_text_length: 50,
        ..PipelineConfig::default()
    }
}

pub fn state_machine(
    repo: Arc<dyn JobRepository>,
    source: Arc<dyn SourceFetcher>,
    config: PipelineConfig,
) -> JobStateMachine {
    let extractor = AttachmentTextExtractor::new(None, config.min_text_length);
    JobStateMachine::new(
        repo,
        source,
        extractor,
        Classifier::default(),
        config,
        WORKER,
    )
}

/// Inserts `job` and claims it as [`WORKER`].
pub fn insert_and_claim(repo: &dyn JobRepository, job: Job) -> Job {
    repo.insert_job(&job).expect("insert job");
    repo.try_claim(&job.id, WORKER, Utc::now())
        .expect("claim query")
        .expect("job is claimable")
}
