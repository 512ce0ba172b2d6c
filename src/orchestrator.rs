use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::Result;
use crate::history::HistoryRecorder;
use crate::providers::{EditImage, TextToImage};
use crate::types::{
    EditRequest, GenerationRequest, ImagesResponse, OperationKind, Provider, ProviderImage,
    ProviderOutcome,
};

struct Branch {
    provider: Provider,
    kind: OperationKind,
    handle: JoinHandle<ProviderOutcome>,
}

pub struct FanOut {
    generators: Vec<Arc<dyn TextToImage>>,
    editors: Vec<Arc<dyn EditImage>>,
    recorder: HistoryRecorder,
    shutdown: CancellationToken,
}

impl FanOut {
    pub fn new(recorder: HistoryRecorder, shutdown: CancellationToken) -> Self {
        Self {
            generators: Vec::new(),
            editors: Vec::new(),
            recorder,
            shutdown,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextToImage>) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn with_editor(mut self, editor: Arc<dyn EditImage>) -> Self {
        self.editors.push(editor);
        self
    }

    /// Never fails: a provider that errors shows up with an empty URL.
    pub async fn generate(&self, request: GenerationRequest, prompt: String) -> ImagesResponse {
        let cancel = self.shutdown.child_token();
        // Dropping this future (client went away) cancels every branch.
        let _guard = cancel.clone().drop_guard();

        let request = Arc::new(request);
        let prompt: Arc<str> = Arc::from(prompt);

        let branches: Vec<Branch> = self
            .generators
            .iter()
            .map(|generator| {
                let generator = Arc::clone(generator);
                let (call_request, call_prompt, cancel) = (request.clone(), prompt.clone(), cancel.clone());
                self.spawn_branch(
                    generator.provider(),
                    OperationKind::TextToImage,
                    prompt.clone(),
                    request.clone(),
                    async move {
                        generator
                            .text_to_image(&call_request, &call_prompt, &cancel)
                            .await
                    },
                )
            })
            .collect();

        let outcomes = join_branches(branches, &prompt).await;
        ImagesResponse::from_outcomes(&outcomes)
    }

    pub async fn edit(&self, request: EditRequest) -> ImagesResponse {
        let cancel = self.shutdown.child_token();
        let _guard = cancel.clone().drop_guard();

        let fields = Arc::new(GenerationRequest {
            style: request.style.clone(),
            ..GenerationRequest::default()
        });
        let prompt: Arc<str> = Arc::from(request.prompt.as_str());
        let request = Arc::new(request);

        let branches: Vec<Branch> = self
            .editors
            .iter()
            .map(|editor| {
                let editor = Arc::clone(editor);
                let (call_request, cancel) = (request.clone(), cancel.clone());
                self.spawn_branch(
                    editor.provider(),
                    OperationKind::EditImage,
                    prompt.clone(),
                    fields.clone(),
                    async move { editor.edit_image(&call_request, &cancel).await },
                )
            })
            .collect();

        let outcomes = join_branches(branches, &prompt).await;
        ImagesResponse::from_outcomes(&outcomes)
    }

    fn spawn_branch<F>(
        &self,
        provider: Provider,
        kind: OperationKind,
        prompt: Arc<str>,
        fields: Arc<GenerationRequest>,
        call: F,
    ) -> Branch
    where
        F: Future<Output = Result<ProviderImage>> + Send + 'static,
    {
        let recorder = self.recorder.clone();
        let span = tracing::info_span!("branch", provider = %provider, kind = kind.as_str());
        let handle = tokio::spawn(
            async move {
                let outcome = match call.await {
                    Ok(image) => {
                        tracing::info!(url = %image.image_url, "provider finished");
                        ProviderOutcome::succeeded(provider, kind, &prompt, image)
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "provider failed");
                        ProviderOutcome::failed(provider, kind, &prompt, err.to_string())
                    }
                };
                recorder.record(&outcome, &fields).await;
                outcome
            }
            .instrument(span),
        );
        Branch {
            provider,
            kind,
            handle,
        }
    }
}

async fn join_branches(branches: Vec<Branch>, prompt: &str) -> Vec<ProviderOutcome> {
    let mut outcomes = Vec::with_capacity(branches.len());
    for branch in branches {
        match branch.handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                tracing::error!(provider = %branch.provider, error = %err, "provider task aborted");
                outcomes.push(ProviderOutcome::failed(
                    branch.provider,
                    branch.kind,
                    prompt,
                    err.to_string(),
                ));
            }
        }
    }
    outcomes
}
