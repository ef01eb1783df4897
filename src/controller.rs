use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::ClassifyError;
use crate::models::{ClassifierState, PredictionResult, SelectedFile};
use crate::network::{RetryPolicy, Transport, interpret_response, post_with_retry};
use crate::preview::{PreviewRegistry, Thumbnail};

#[derive(Default)]
struct Shared {
    state: ClassifierState,
    previews: PreviewRegistry,
    /// Bumped whenever the selection changes.
    generation: u64,
}

impl Shared {
    fn release_preview(&mut self) {
        if let Some(old) = self.state.preview.take() {
            self.previews.release(&old);
        }
    }

    fn clear_selection(&mut self) {
        self.release_preview();
        self.state.selected = None;
        self.generation += 1;
    }

    fn reject(&mut self, err: &ClassifyError, endpoint: &str) {
        self.clear_selection();
        self.state.prediction = None;
        self.state.error = Some(err.user_message(endpoint));
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a request as in flight. Loading is switched off exactly once, either by
/// [`InFlight::finish`] or, if the submit future is dropped early, on drop.
struct InFlight {
    shared: Arc<Mutex<Shared>>,
    /// Selection generation the request was made for.
    generation: u64,
    finished: bool,
}

impl InFlight {
    /// Applies the outcome unless the selection changed since submit, then
    /// clears loading.
    fn finish(mut self, apply: impl FnOnce(&mut ClassifierState)) {
        let mut guard = lock(&self.shared);
        if guard.generation == self.generation {
            apply(&mut guard.state);
            guard.state.settled_at = Some(Local::now());
        } else {
            debug!("selection changed during the request, dropping its result");
        }
        guard.state.loading = false;
        guard.state.attempt = 0;
        drop(guard);
        self.finished = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            let mut guard = lock(&self.shared);
            guard.state.loading = false;
            guard.state.attempt = 0;
        }
    }
}

/// Owns the upload state and drives the select/submit cycle.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Mutex<Shared>>,
    transport: Arc<dyn Transport>,
    endpoint: Arc<str>,
    policy: RetryPolicy,
}

impl Controller {
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<Arc<str>>, policy: RetryPolicy) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            transport,
            endpoint: endpoint.into(),
            policy,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn snapshot(&self) -> ClassifierState {
        lock(&self.shared).state.clone()
    }

    #[cfg(test)]
    pub fn is_preview_live(&self, id: u64) -> bool {
        lock(&self.shared).previews.is_live(id)
    }

    pub fn select_file(&self, file: Option<SelectedFile>) -> Result<(), ClassifyError> {
        let Some(file) = file else {
            lock(&self.shared).clear_selection();
            return Ok(());
        };

        if !file.is_image() {
            warn!(file = %file.name, media_type = %file.media_type, "rejected non-image file");
            let err = ClassifyError::NotAnImage {
                media_type: file.media_type,
            };
            lock(&self.shared).reject(&err, &self.endpoint);
            return Err(err);
        }

        // Decoded before locking so the render loop never waits on it.
        let thumbnail = Thumbnail::from_bytes(&file.bytes).map(Arc::new);
        let mut guard = lock(&self.shared);
        guard.release_preview();
        guard.generation += 1;
        let preview = guard.previews.create(&file, thumbnail);
        info!(file = %file.name, bytes = file.size(), preview = preview.id, "selected image");
        guard.state.preview = Some(preview);
        guard.state.selected = Some(file);
        guard.state.prediction = None;
        guard.state.error = None;
        Ok(())
    }

    /// Loads `raw_path` from disk and selects it. Unreadable paths are rejected
    /// the same way as non-image files.
    pub fn select_path(&self, raw_path: &str) -> Result<(), ClassifyError> {
        match SelectedFile::from_path(raw_path) {
            Ok(file) => self.select_file(Some(file)),
            Err(err) => {
                warn!(path = raw_path, error = %err, "could not load file");
                lock(&self.shared).reject(&err, &self.endpoint);
                Err(err)
            }
        }
    }

    pub async fn submit(&self) -> Result<PredictionResult, ClassifyError> {
        let (file, in_flight) = {
            let mut guard = lock(&self.shared);
            if guard.state.loading {
                warn!("ignoring submit while a request is in flight");
                return Err(ClassifyError::Busy);
            }
            let Some(file) = guard.state.selected.clone() else {
                let err = ClassifyError::NoFileSelected;
                guard.state.error = Some(err.user_message(&self.endpoint));
                return Err(err);
            };
            guard.state.loading = true;
            guard.state.attempt = 0;
            guard.state.error = None;
            guard.state.prediction = None;
            let in_flight = InFlight {
                shared: Arc::clone(&self.shared),
                generation: guard.generation,
                finished: false,
            };
            (file, in_flight)
        };

        info!(file = %file.name, endpoint = %self.endpoint, "submitting image");
        let progress = Arc::clone(&self.shared);
        let outcome = post_with_retry(
            self.transport.as_ref(),
            &self.endpoint,
            &file,
            &self.policy,
            move |attempt| lock(&progress).state.attempt = attempt,
        )
        .await;

        let result = interpret_response(outcome.response);
        match &result {
            Ok(prediction) => info!(
                emotion = %prediction.predicted_emotion,
                confidence = prediction.confidence,
                "prediction received"
            ),
            Err(err) => warn!(error = %err, "prediction failed"),
        }

        let endpoint = Arc::clone(&self.endpoint);
        in_flight.finish(|state| match &result {
            Ok(prediction) => state.prediction = Some(prediction.clone()),
            Err(err) => state.error = Some(err.user_message(&endpoint)),
        });
        result
    }
}
