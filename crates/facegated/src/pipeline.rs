//! Enrollment and identification pipelines.
//!
//! Enrollment: stage the image, insert the registry row, extract the
//! embedding, persist the signature, commit. Every failure after the
//! insert compensates by removing the row and discarding staged blobs,
//! so a failed enrollment leaves nothing behind.
//!
//! Identification: scan the registry, retain the probe image, extract
//! the probe embedding, load every enrolled signature under a bounded
//! fan-out and pick the nearest match within the distance threshold.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use facegate_core::{
    AnalyzerError, Embedding, GalleryEntry, Matcher, NearestMatcher,
};
use facegate_store::{codec, BlobStore, NewUser, StoreError, UserRecord, UserRegistry};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::engine::{EngineError, EngineHandle};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),
    #[error("face engine unavailable: {0}")]
    Engine(EngineError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of an enrollment request. Pipeline-local rejections are values,
/// not errors.
#[derive(Debug)]
pub enum RegisterOutcome {
    Registered(UserRecord),
    DuplicateUser,
    NoFaceDetected,
}

/// Result of an identification request.
#[derive(Debug)]
pub enum IdentifyOutcome {
    Match { user: UserRecord, distance: f32 },
    NoMatch,
    NoFaceDetected,
}

pub struct Pipelines {
    registry: UserRegistry,
    images: BlobStore,
    signatures: BlobStore,
    engine: EngineHandle,
    matcher: NearestMatcher,
    match_threshold: f32,
    signature_reads: usize,
    request_timeout: Duration,
}

impl Pipelines {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: UserRegistry,
        images: BlobStore,
        signatures: BlobStore,
        engine: EngineHandle,
        match_threshold: f32,
        signature_reads: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            images,
            signatures,
            engine,
            matcher: NearestMatcher,
            match_threshold,
            signature_reads,
            request_timeout,
        }
    }

    /// Enroll a user from a name, an email and an uploaded photo.
    pub async fn register(
        &self,
        name: String,
        email: String,
        image_bytes: Vec<u8>,
    ) -> Result<RegisterOutcome, PipelineError> {
        let filename = Uuid::new_v4().to_string();
        let inner = self.register_inner(&filename, name, email, image_bytes);
        match tokio::time::timeout(self.request_timeout, inner).await {
            Ok(result) => result,
            Err(_) => {
                // The inner future was dropped mid-flight; undo whatever
                // it managed to persist.
                self.rollback(&filename).await;
                Err(PipelineError::Timeout(self.request_timeout))
            }
        }
    }

    async fn register_inner(
        &self,
        filename: &str,
        name: String,
        email: String,
        image_bytes: Vec<u8>,
    ) -> Result<RegisterOutcome, PipelineError> {
        self.images.stage(filename, &image_bytes).await?;

        let user = match self
            .registry
            .insert(NewUser {
                name,
                email,
                filename: filename.to_string(),
            })
            .await
        {
            Ok(user) => user,
            Err(StoreError::Duplicate) => {
                self.images.discard(filename).await;
                tracing::info!(filename, "registration rejected: duplicate user");
                return Ok(RegisterOutcome::DuplicateUser);
            }
            Err(e) => {
                self.images.discard(filename).await;
                return Err(e.into());
            }
        };

        let embedding = match self.encode(image_bytes).await {
            Ok(Some(embedding)) => embedding,
            Ok(None) => {
                self.rollback(filename).await;
                tracing::info!(filename, "registration rejected: no face in image");
                return Ok(RegisterOutcome::NoFaceDetected);
            }
            Err(e) => {
                self.rollback(filename).await;
                return Err(e);
            }
        };

        if let Err(e) = self.persist_signature(filename, &embedding).await {
            self.rollback(filename).await;
            return Err(e.into());
        }
        if let Err(e) = self.images.commit(filename).await {
            self.rollback(filename).await;
            return Err(e.into());
        }

        tracing::info!(user = user.id, filename, "user registered");
        Ok(RegisterOutcome::Registered(user))
    }

    async fn persist_signature(
        &self,
        filename: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        self.signatures.stage(filename, &codec::encode(embedding)).await?;
        self.signatures.commit(filename).await
    }

    /// Best-effort compensation: remove the registry row and any blob,
    /// staged or committed, written for this identifier.
    async fn rollback(&self, filename: &str) {
        if let Err(e) = self.registry.delete_by_filename(filename).await {
            tracing::warn!(filename, error = %e, "rollback: could not remove registry row");
        }
        self.images.discard(filename).await;
        self.signatures.discard(filename).await;
        if let Err(e) = self.images.remove(filename).await {
            tracing::warn!(filename, error = %e, "rollback: could not remove image blob");
        }
        if let Err(e) = self.signatures.remove(filename).await {
            tracing::warn!(filename, error = %e, "rollback: could not remove signature blob");
        }
    }

    /// Identify a probe photo against every enrolled user.
    pub async fn identify(&self, image_bytes: Vec<u8>) -> Result<IdentifyOutcome, PipelineError> {
        let probe_id = Uuid::new_v4().to_string();
        let inner = self.identify_inner(&probe_id, image_bytes);
        match tokio::time::timeout(self.request_timeout, inner).await {
            Ok(result) => result,
            Err(_) => {
                self.images.discard(&probe_id).await;
                Err(PipelineError::Timeout(self.request_timeout))
            }
        }
    }

    async fn identify_inner(
        &self,
        probe_id: &str,
        image_bytes: Vec<u8>,
    ) -> Result<IdentifyOutcome, PipelineError> {
        let users = self.registry.all().await?;

        // Probes are retained for audit regardless of the outcome.
        self.images.stage(probe_id, &image_bytes).await?;
        self.images.commit(probe_id).await?;

        let probe = match self.encode(image_bytes).await {
            Ok(Some(embedding)) => embedding,
            Ok(None) => return Ok(IdentifyOutcome::NoFaceDetected),
            Err(e) => return Err(e),
        };

        let gallery = self.load_gallery(&users).await;
        tracing::debug!(
            enrolled = users.len(),
            compared = gallery.len(),
            probe = probe_id,
            "gallery loaded"
        );

        let outcome = self
            .matcher
            .best_match(&probe, &gallery, self.match_threshold);

        match outcome.position {
            Some(position) if outcome.matched => {
                // position indexes the registry scan order used to build
                // the gallery.
                let user = users[position].clone();
                tracing::info!(
                    user = user.id,
                    distance = outcome.distance,
                    probe = probe_id,
                    "probe matched"
                );
                Ok(IdentifyOutcome::Match {
                    user,
                    distance: outcome.distance,
                })
            }
            _ => {
                tracing::info!(
                    distance = outcome.distance,
                    probe = probe_id,
                    "probe matched no enrolled user"
                );
                Ok(IdentifyOutcome::NoMatch)
            }
        }
    }

    /// Delete a user together with their image and signature blobs.
    pub async fn remove_user(&self, id: i64) -> Result<UserRecord, PipelineError> {
        let user = self.registry.delete(id).await?;
        self.images.remove(&user.filename).await?;
        self.signatures.remove(&user.filename).await?;
        tracing::info!(user = user.id, filename = %user.filename, "user deleted");
        Ok(user)
    }

    async fn encode(&self, image: Vec<u8>) -> Result<Option<Embedding>, PipelineError> {
        match self.engine.encode(image).await {
            Ok(embedding) => Ok(Some(embedding)),
            Err(EngineError::Analyzer(AnalyzerError::NoFaceDetected)) => Ok(None),
            Err(EngineError::Analyzer(AnalyzerError::InvalidImage(e))) => {
                Err(PipelineError::InvalidImage(e.to_string()))
            }
            Err(e) => Err(PipelineError::Engine(e)),
        }
    }

    /// Load every user's signature with at most `signature_reads` reads
    /// in flight. A user whose signature is missing or undecodable is
    /// logged and excluded; the identification proceeds without them.
    async fn load_gallery(&self, users: &[UserRecord]) -> Vec<GalleryEntry> {
        let loaded = bounded_fan_out(users.len(), self.signature_reads, |index| {
            let signatures = self.signatures.clone();
            let filename = users[index].filename.clone();
            async move {
                match codec::read_signature(&signatures, &filename).await {
                    Ok(embedding) => Some(embedding),
                    Err(e) => {
                        tracing::warn!(
                            filename = %filename,
                            error = %e,
                            "signature unavailable; excluding user from comparison"
                        );
                        None
                    }
                }
            }
        })
        .await;

        loaded
            .into_iter()
            .enumerate()
            .filter_map(|(position, embedding)| {
                embedding.map(|embedding| GalleryEntry {
                    position,
                    embedding,
                })
            })
            .collect()
    }
}

/// Run `make(index)` for `count` items with at most `limit` futures past
/// the semaphore at once. Results come back indexed by item, not by
/// completion order.
async fn bounded_fan_out<T, F, Fut>(count: usize, limit: usize, make: F) -> Vec<Option<T>>
where
    T: Send + 'static,
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();

    for index in 0..count {
        let semaphore = Arc::clone(&semaphore);
        let fut = make(index);
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, None);
            };
            (index, fut.await)
        });
    }

    let mut results: Vec<Option<T>> = Vec::with_capacity(count);
    results.resize_with(count, || None);
    while let Some(joined) = tasks.join_next().await {
        if let Ok((index, value)) = joined {
            results[index] = value;
        }
    }
    results
}
