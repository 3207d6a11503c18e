//! Per-task post-processing pipeline

use super::CompletionRouter;
use crate::config::FileCollisionAction;
use crate::error::FetchError;
use crate::policy::Plan;
use crate::registry::{Claim, Outcome};
use crate::staging::StagedArtifact;
use crate::types::{Delivery, EntryState, Event, TaskId, TransferRequest};
use crate::utils::{reserve_unique_path, sanitize_file_name};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

impl CompletionRouter {
    /// Run the pipeline for a claimed task and deliver its outcome
    ///
    /// A panic anywhere in the pipeline is turned into
    /// [`FetchError::Internal`]; unwinding still drops the staged file.
    pub(super) async fn process(&self, claim: Claim, location: PathBuf) {
        let task_id = claim.task_id;
        let outcome = AssertUnwindSafe(self.run_pipeline(&claim, &location))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                tracing::error!(task_id = task_id.0, panic = %message, "pipeline panicked");
                Err(FetchError::Internal { message })
            });
        self.finish(task_id, outcome).await;
    }

    async fn run_pipeline(&self, claim: &Claim, location: &Path) -> Outcome {
        let task_id = claim.task_id;
        let request = &claim.request;
        let kind = request.source_kind();

        let staged = StagedArtifact::stage(location, self.config.staging_dir(), kind.extension())
            .await
            .map_err(|e| {
                tracing::error!(task_id = task_id.0, error = %e, "failed to stage artifact");
                FetchError::staging(e)
            })?;
        self.registry.set_state(task_id, EntryState::Staged).await;
        self.emit(Event::Staged {
            id: task_id,
            path: staged.path().to_path_buf(),
        });

        if claim.cancel.is_cancelled() {
            staged.discard().await;
            return Err(FetchError::Cancelled);
        }

        let plan = self.policy.plan_for(&kind);
        tracing::debug!(task_id = task_id.0, ?kind, ?plan, "normalization plan");

        let artifact = match plan {
            Plan::Transcode => self.transcode(claim, staged).await?,
            Plan::PassThrough => self.finalize(claim, staged).await?,
        };

        let destination = tokio::select! {
            biased;
            _ = claim.cancel.cancelled() => None,
            destination = self.destination.resolve(artifact.path(), request) => Some(destination),
        };
        let Some(destination) = destination else {
            artifact.discard().await;
            return Err(FetchError::Cancelled);
        };

        Ok(Delivery {
            task_id,
            path: artifact.keep(),
            destination,
            transcoded: plan == Plan::Transcode,
        })
    }

    /// `Staged -> Transcoding`: the staged input is deleted whatever the result
    ///
    /// The transcoder writes into the staging directory; only a finished
    /// output is moved to the output directory.
    async fn transcode(
        &self,
        claim: &Claim,
        staged: StagedArtifact,
    ) -> Result<StagedArtifact, FetchError> {
        let task_id = claim.task_id;

        let permit = tokio::select! {
            biased;
            _ = claim.cancel.cancelled() => None,
            permit = self.transcode_slots.acquire() => Some(permit),
        };
        let _permit = match permit {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => {
                staged.discard().await;
                return Err(FetchError::Internal {
                    message: "transcode pool closed".into(),
                });
            }
            None => {
                staged.discard().await;
                return Err(FetchError::Cancelled);
            }
        };

        let extension = self
            .config
            .transcode
            .output_extension
            .trim_start_matches('.')
            .to_string();
        let scratch = StagedArtifact::scratch(self.config.staging_dir(), Some(&extension));

        self.registry
            .set_state(task_id, EntryState::Transcoding)
            .await;
        self.emit(Event::Transcoding { id: task_id });
        tracing::debug!(
            task_id = task_id.0,
            transcoder = self.transcoder.name(),
            input = ?staged.path(),
            output = ?scratch.path(),
            "transcoding"
        );

        let result = tokio::select! {
            biased;
            _ = claim.cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.transcoder.transcode(staged.path(), scratch.path()) => {
                result.map_err(FetchError::from)
            }
        };
        staged.discard().await;

        let produced = match result {
            Ok(produced) => produced,
            Err(e) => {
                tracing::error!(task_id = task_id.0, error = %e, "transcode failed");
                scratch.discard().await;
                return Err(e);
            }
        };
        let output = if produced.as_path() == scratch.path() {
            scratch
        } else {
            scratch.discard().await;
            StagedArtifact::adopt(produced)
        };

        self.move_to_output(claim, output, Some(&extension)).await
    }

    /// `Staged -> DirectFinalize`: move the staged file to the stable output directory
    async fn finalize(
        &self,
        claim: &Claim,
        staged: StagedArtifact,
    ) -> Result<StagedArtifact, FetchError> {
        self.registry
            .set_state(claim.task_id, EntryState::DirectFinalize)
            .await;
        self.move_to_output(claim, staged, None).await
    }

    /// Move `artifact` to a reserved name in the output directory
    ///
    /// The name is claimed atomically before the move, so two tasks named
    /// after the same source never end up with the same file.
    async fn move_to_output(
        &self,
        claim: &Claim,
        artifact: StagedArtifact,
        extension: Option<&str>,
    ) -> Result<StagedArtifact, FetchError> {
        let task_id = claim.task_id;
        let collision = self.config.download.file_collision;

        let desired = self.output_name(&claim.request, extension);
        let reserved = match reserve_unique_path(&desired, collision).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(task_id = task_id.0, error = %e, "no usable output name");
                artifact.discard().await;
                return Err(FetchError::staging(e));
            }
        };
        // Owned by this task until the artifact replaces it; an overwrite
        // target may belong to someone else and is never removed here.
        let placeholder = (collision != FileCollisionAction::Overwrite)
            .then(|| StagedArtifact::adopt(reserved.clone()));

        match artifact.persist(&reserved).await {
            Ok(path) => {
                if let Some(placeholder) = placeholder {
                    placeholder.keep();
                }
                tracing::debug!(task_id = task_id.0, path = ?path, "artifact finalized");
                Ok(StagedArtifact::adopt(path))
            }
            Err((e, artifact)) => {
                tracing::error!(task_id = task_id.0, error = %e, "failed to finalize artifact");
                artifact.discard().await;
                if let Some(placeholder) = placeholder {
                    placeholder.discard().await;
                }
                Err(FetchError::staging(e))
            }
        }
    }

    /// Desired path in the output directory named after the source
    ///
    /// `extension` replaces the source's own extension when given.
    fn output_name(&self, request: &TransferRequest, extension: Option<&str>) -> PathBuf {
        let name = sanitize_file_name(&request.file_name());
        let file_name = match extension {
            Some(ext) => {
                let stem = Path::new(&name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone());
                format!("{}.{}", stem, ext)
            }
            None => name,
        };
        self.config.output_dir().join(file_name)
    }

    /// Deliver the outcome, release the entry and publish the terminal event
    pub(super) async fn finish(&self, task_id: TaskId, outcome: Outcome) {
        let event = match &outcome {
            Ok(delivery) => {
                tracing::info!(
                    task_id = task_id.0,
                    path = ?delivery.path,
                    destination = ?delivery.destination,
                    transcoded = delivery.transcoded,
                    "transfer delivered"
                );
                Event::Delivered {
                    id: task_id,
                    path: delivery.path.clone(),
                    destination: delivery.destination,
                }
            }
            Err(e) => {
                if matches!(e, FetchError::Cancelled) {
                    tracing::info!(task_id = task_id.0, "transfer cancelled");
                } else {
                    tracing::error!(task_id = task_id.0, error = %e, "transfer failed");
                }
                Event::Failed {
                    id: task_id,
                    code: e.error_code().to_string(),
                    error: e.to_string(),
                }
            }
        };

        if self.registry.complete(task_id, outcome).await {
            self.emit(event);
        } else {
            tracing::warn!(task_id = task_id.0, "task released before its outcome was delivered");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "pipeline panicked".to_string()
    }
}
