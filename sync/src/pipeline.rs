//! Span synchronization: fetch upstream spans, keep unseen LLM requests,
//! store each as a trajectory and feed generated guidelines through conflict
//! resolution.

use crate::converter::{ConvertOptions, convert_span};
use crate::error::Result;
use crate::span::Span;
use crate::source::TraceSource;
use crate::state::{PendingGuideline, SyncState, state_key};
use crate::state_persister::SyncStatePersister;
use chrono::Utc;
use config::SyncConfig;
use errors::{StoreError, StoreResult};
use knowledge::ConflictResolutionEngine;
use metrics::counter;
use mk_core::messages::Message;
use mk_core::traits::{EntityStore, GuidelineGenerator};
use mk_core::types::{EntityKind, EntityQuery, NewEntity, TrajectoryPayload};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Parameters of one sync invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub namespace_id: String,
    pub project: String,
    pub page_size: usize,
    /// Upper bound on spans fetched by this invocation.
    pub max_spans: usize,
    pub include_errors: bool,
}

impl SyncRequest {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            namespace_id: config.namespace_id.clone(),
            project: config.project.clone(),
            page_size: config.page_size,
            max_spans: config.max_spans,
            include_errors: config.include_errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanError {
    pub span_id: String,
    pub message: String,
}

/// Summary of one sync invocation. Per-span failures are listed in `errors`
/// rather than failing the invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub processed: usize,
    /// Spans dropped by the filters, including already processed ones.
    pub skipped: usize,
    pub guidelines_generated: usize,
    pub errors: Vec<SpanError>,
}

enum SpanOutcome {
    Skipped(&'static str),
    Processed,
}

pub struct SyncPipeline {
    source: Arc<dyn TraceSource>,
    engine: Arc<ConflictResolutionEngine>,
    generator: Arc<dyn GuidelineGenerator>,
    persister: Arc<dyn SyncStatePersister>,
    llm_span_name: String,
    options: ConvertOptions,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn TraceSource>,
        engine: Arc<ConflictResolutionEngine>,
        generator: Arc<dyn GuidelineGenerator>,
        persister: Arc<dyn SyncStatePersister>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            engine,
            generator,
            persister,
            llm_span_name: config.llm_span_name.clone(),
            options: ConvertOptions::default(),
        }
    }

    pub fn with_convert_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs one sync to completion.
    ///
    /// Only an unreachable trace source, an unavailable store or a state
    /// write failure abort the run. Everything else is reported per span.
    #[instrument(
        skip(self, request),
        fields(namespace = %request.namespace_id, project = %request.project)
    )]
    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncReport> {
        info!(
            page_size = request.page_size,
            max_spans = request.max_spans,
            "Starting sync"
        );

        match self.run(request).await {
            Ok(report) => {
                info!(
                    fetched = report.fetched,
                    processed = report.processed,
                    skipped = report.skipped,
                    guidelines = report.guidelines_generated,
                    errors = report.errors.len(),
                    "Sync complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Sync failed");
                counter!("sync.errors", "kind" => "hard").increment(1);
                Err(e)
            }
        }
    }

    async fn run(&self, request: &SyncRequest) -> Result<SyncReport> {
        let store = self.engine.store();
        ensure_namespace(store.as_ref(), &request.namespace_id).await?;

        let key = state_key(&request.namespace_id, &request.project);
        let mut state = self.persister.load(&key).await?;
        self.seed_from_store(store.as_ref(), &request.namespace_id, &mut state)
            .await?;

        let mut report = SyncReport::default();
        let pending = std::mem::take(&mut state.pending_guidelines);
        if !pending.is_empty() {
            info!(count = pending.len(), "Retrying pending guidelines");
            self.submit_guidelines(request, &key, &mut state, pending, &mut report)
                .await?;
            self.persister.save(&key, &state).await?;
        }

        let mut cursor = state.cursor.clone();
        let page_size = request.page_size.max(1);

        loop {
            let remaining = request.max_spans.saturating_sub(report.fetched);
            if remaining == 0 {
                break;
            }

            let page = self
                .source
                .fetch_page(
                    &request.project,
                    page_size.min(remaining),
                    cursor.as_deref(),
                )
                .await?;
            let exhausted = page.next_cursor.is_none() || page.spans.is_empty();

            for span in page.spans.iter().take(remaining) {
                report.fetched += 1;
                match self.process_span(request, span, &key, &mut state, &mut report).await? {
                    SpanOutcome::Processed => {
                        report.processed += 1;
                        counter!("sync.spans.processed").increment(1);
                    }
                    SpanOutcome::Skipped(reason) => {
                        report.skipped += 1;
                        counter!("sync.spans.skipped", "reason" => reason).increment(1);
                    }
                }
            }

            cursor = page.next_cursor;
            state.cursor = cursor.clone();
            self.persister.save(&key, &state).await?;

            if exhausted {
                break;
            }
        }

        state.last_sync_at = Some(Utc::now());
        state.stats.total_syncs += 1;
        state.stats.total_spans_processed += report.processed as u64;
        state.stats.total_guidelines_generated += report.guidelines_generated as u64;
        state.stats.total_errors += report.errors.len() as u64;
        self.persister.save(&key, &state).await?;

        Ok(report)
    }

    /// Trajectories already in the store count as processed even if the
    /// persisted state was lost.
    async fn seed_from_store(
        &self,
        store: &dyn EntityStore,
        namespace_id: &str,
        state: &mut SyncState,
    ) -> Result<()> {
        let trajectories = store
            .list_entities(namespace_id, &EntityQuery::of_kind(EntityKind::Trajectory))
            .await?;
        for entity in &trajectories {
            if let Some(span_id) = entity.as_trajectory().and_then(|t| t.span_id.clone()) {
                state.mark_processed(span_id);
            }
        }
        Ok(())
    }

    fn skip_reason(
        &self,
        request: &SyncRequest,
        span: &Span,
        state: &SyncState,
    ) -> Option<&'static str> {
        if span.name != self.llm_span_name {
            return Some("not_llm_request");
        }
        if span.is_error() && !request.include_errors {
            return Some("error_status");
        }
        let Some(span_id) = span.span_id.as_deref() else {
            return Some("missing_span_id");
        };
        if !span.has_prompt() {
            return Some("no_prompt");
        }
        if state.is_processed(span_id) {
            return Some("already_processed");
        }
        None
    }

    async fn process_span(
        &self,
        request: &SyncRequest,
        span: &Span,
        key: &str,
        state: &mut SyncState,
        report: &mut SyncReport,
    ) -> Result<SpanOutcome> {
        if let Some(reason) = self.skip_reason(request, span, state) {
            debug!(span_id = ?span.span_id, reason, "Skipping span");
            return Ok(SpanOutcome::Skipped(reason));
        }
        let span_id = span.span_id.clone().unwrap_or_default();

        let messages = convert_span(span, self.options);
        if messages.is_empty() {
            debug!(span_id = %span_id, "Span converted to no messages");
            return Ok(SpanOutcome::Skipped("empty_conversation"));
        }

        let trajectory = match trajectory_entity(span, &messages) {
            Ok(entity) => entity,
            Err(e) => {
                record_error(report, &span_id, &e);
                return Ok(SpanOutcome::Skipped("unstorable"));
            }
        };
        let store = self.engine.store();
        if let Err(e) = store.add_entity(&request.namespace_id, trajectory).await {
            if e.is_hard_failure() {
                return Err(e.into());
            }
            record_error(report, &span_id, &e);
            return Ok(SpanOutcome::Skipped("unstorable"));
        }

        state.mark_processed(span_id.clone());
        self.persister.save(key, state).await?;

        let guidelines = self.draft_guidelines(span, &span_id, &messages, report).await;
        self.submit_guidelines(request, key, state, guidelines, report)
            .await?;
        Ok(SpanOutcome::Processed)
    }

    /// Generates the span's guidelines with their provenance attached. A
    /// generation failure is recorded and yields none.
    async fn draft_guidelines(
        &self,
        span: &Span,
        span_id: &str,
        messages: &[Message],
        report: &mut SyncReport,
    ) -> Vec<PendingGuideline> {
        let generated = match self.generator.generate(messages).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(span_id, error = %e, "Guideline generation failed, trajectory kept");
                record_error(report, span_id, &e);
                return Vec::new();
            }
        };

        report.guidelines_generated += generated.guidelines.len();
        counter!("sync.guidelines.generated").increment(generated.guidelines.len() as u64);

        generated
            .guidelines
            .into_iter()
            .map(|draft| {
                let (content, mut metadata) = draft.into_payload();
                metadata = metadata.with_extra("source_span_id", span_id);
                if let Some(trace_id) = &span.trace_id {
                    metadata = metadata.with_extra("source_trace_id", trace_id.as_str());
                }
                if let Some(task) = &generated.task_description {
                    metadata = metadata.with_extra("task_description", task.as_str());
                }
                PendingGuideline {
                    span_id: span_id.to_string(),
                    content,
                    metadata,
                }
            })
            .collect()
    }

    /// Submits guidelines through conflict resolution. On a hard failure the
    /// unsubmitted ones are saved in the state before the error is returned.
    async fn submit_guidelines(
        &self,
        request: &SyncRequest,
        key: &str,
        state: &mut SyncState,
        guidelines: Vec<PendingGuideline>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut queue = guidelines.into_iter();
        while let Some(guideline) = queue.next() {
            match self
                .engine
                .submit(&request.namespace_id, guideline.to_entity(), true)
                .await
            {
                Ok(outcome) => {
                    debug!(
                        span_id = %guideline.span_id,
                        action = %outcome.action(),
                        "Guideline resolved"
                    );
                }
                Err(e) if e.is_hard_failure() => {
                    state.pending_guidelines.push(guideline);
                    state.pending_guidelines.extend(queue);
                    warn!(
                        pending = state.pending_guidelines.len(),
                        "Guideline submission interrupted, keeping the rest for the next sync"
                    );
                    self.persister.save(key, state).await?;
                    return Err(e.into());
                }
                Err(e) => record_error(report, &guideline.span_id, &e),
            }
        }
        Ok(())
    }
}

fn trajectory_entity(span: &Span, messages: &[Message]) -> StoreResult<NewEntity> {
    let content = serde_json::to_string(messages)
        .map_err(|e| StoreError::invalid(format!("unserializable trajectory: {e}")))?;
    let usage = span.usage();
    let payload = TrajectoryPayload {
        trace_id: span.trace_id.clone(),
        span_id: span.span_id.clone(),
        model: Some(span.model()),
        timestamp: span.start_time.clone(),
        message_count: Some(messages.len()),
        usage: Some(usage),
        ..TrajectoryPayload::default()
    };
    Ok(NewEntity::trajectory(content, payload))
}

fn record_error(report: &mut SyncReport, span_id: &str, error: &dyn std::fmt::Display) {
    counter!("sync.errors", "kind" => "span").increment(1);
    report.errors.push(SpanError {
        span_id: span_id.to_string(),
        message: error.to_string(),
    });
}

/// Creates the namespace unless it already exists.
pub(crate) async fn ensure_namespace(
    store: &dyn EntityStore,
    namespace_id: &str,
) -> StoreResult<()> {
    match store.get_namespace(namespace_id).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => match store.create_namespace(Some(namespace_id)).await {
            Ok(_) => {
                info!(namespace = %namespace_id, "Created namespace for sync");
                Ok(())
            }
            Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}
