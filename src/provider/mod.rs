//! Language-generation service boundary
//!
//! What this module provides
//! - `GenerationRequest { system_prompt, messages, output_schema, capabilities, temperature }`
//! - `GenerationResponse { content, structured, invocations }`
//! - `GenerationService`: `Service<GenerationRequest, Response = GenerationResponse, Error = BoxError>`
//!   - `OpenAIProvider`: chat-completions over async-openai, honouring a custom base URL
//!   - `ScriptedProvider`: replays canned responses and records requests, for tests and demos
//!
//! Router and invoker code only ever see these types; async-openai wire types stay inside
//! `OpenAIProvider`. Failures are returned as `GenerationError` so they classify cleanly.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, FunctionObject, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use serde_json::Value;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::items::{ConversationTurn, Role};
use crate::resilience::GenerationError;

/// A named callable the model may choose to invoke.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A capability call made by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// JSON schema the response content must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub description: Option<String>,
    pub schema: Value,
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<ConversationTurn>,
    pub output_schema: Option<OutputSchema>,
    pub capabilities: Vec<Capability>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<ConversationTurn>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            output_schema: None,
            capabilities: Vec::new(),
            temperature: None,
        }
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub content: Option<String>,
    /// Parsed payload when the request carried an output schema
    pub structured: Option<Value>,
    pub invocations: Vec<CapabilityInvocation>,
}

impl GenerationResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn structured(payload: Value) -> Self {
        Self {
            content: Some(payload.to_string()),
            structured: Some(payload),
            invocations: Vec::new(),
        }
    }

    pub fn invoking(names: &[&str]) -> Self {
        Self {
            content: None,
            structured: None,
            invocations: names
                .iter()
                .enumerate()
                .map(|(i, n)| CapabilityInvocation {
                    id: format!("call_{}", i),
                    name: n.to_string(),
                    arguments: Value::Object(Default::default()),
                })
                .collect(),
        }
    }
}

pub trait GenerationService:
    Service<GenerationRequest, Response = GenerationResponse, Error = BoxError>
{
}
impl<T> GenerationService for T where
    T: Service<GenerationRequest, Response = GenerationResponse, Error = BoxError>
{
}

/// Boxed, shareable generation service.
pub type GenerationSvc = BoxCloneSyncService<GenerationRequest, GenerationResponse, BoxError>;

pub fn boxed<S>(svc: S) -> GenerationSvc
where
    S: GenerationService + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(svc)
}

// ===== OpenAI =====

/// Chat-completions provider backed by async-openai.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAIProvider {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            model: model.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(settings.api_key.expose())
            .with_api_base(settings.base_url.clone());
        Self::new(Client::with_config(config), settings.model.clone())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn convert_turn(turn: &ConversationTurn) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        Ok(match turn.role {
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
            Role::Agent => ChatCompletionRequestAssistantMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
        })
    }

    fn convert_capability(cap: &Capability) -> ChatCompletionTool {
        ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: cap.name.clone(),
                description: Some(cap.description.clone()),
                parameters: Some(cap.parameters.clone()),
                ..Default::default()
            },
        }
    }

    /// Map our request onto an async-openai chat request.
    pub fn build_request(
        &self,
        req: &GenerationRequest,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(req.messages.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(req.system_prompt.clone())
                .build()?
                .into(),
        );
        for turn in &req.messages {
            messages.push(Self::convert_turn(turn)?);
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(messages);
        if let Some(t) = req.temperature {
            builder.temperature(t);
        }
        if !req.capabilities.is_empty() {
            builder.tools(
                req.capabilities
                    .iter()
                    .map(Self::convert_capability)
                    .collect::<Vec<_>>(),
            );
        }
        if let Some(schema) = &req.output_schema {
            builder.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: schema.description.clone(),
                    name: schema.name.clone(),
                    schema: Some(schema.schema.clone()),
                    strict: Some(schema.strict),
                },
            });
        }
        builder.build()
    }
}

impl Service<GenerationRequest> for OpenAIProvider {
    type Response = GenerationResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GenerationRequest) -> Self::Future {
        let client = self.client.clone();
        let built = self.build_request(&req);
        let wants_structured = req.output_schema.is_some();
        Box::pin(async move {
            let request = built.map_err(GenerationError::from)?;
            debug!(
                "Calling {} with {} messages",
                request.model,
                request.messages.len()
            );
            let response = client
                .chat()
                .create(request)
                .await
                .map_err(GenerationError::from)?;

            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| GenerationError::malformed("response contained no choices"))?;
            let message = choice.message;

            let invocations = message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    let arguments = serde_json::from_str(&tc.function.arguments)
                        .unwrap_or_else(|e| {
                            warn!(
                                "Unparseable arguments for {}: {}",
                                tc.function.name, e
                            );
                            Value::Null
                        });
                    CapabilityInvocation {
                        id: tc.id,
                        name: tc.function.name,
                        arguments,
                    }
                })
                .collect();

            let structured = if wants_structured {
                let raw = message.content.as_deref().ok_or_else(|| {
                    GenerationError::malformed("structured response had no content")
                })?;
                let value: Value = serde_json::from_str(raw).map_err(|e| {
                    GenerationError::malformed(format!("structured response is not JSON: {}", e))
                })?;
                Some(value)
            } else {
                None
            };

            Ok(GenerationResponse {
                content: message.content,
                structured,
                invocations,
            })
        })
    }
}

// ===== Scripted =====

/// Replays a fixed sequence of outcomes, one per call, and records every request.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<VecDeque<Result<GenerationResponse, GenerationError>>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<GenerationResponse, GenerationError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            requests: Arc::default(),
        }
    }

    pub fn responses(responses: Vec<GenerationResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn push(&self, outcome: Result<GenerationResponse, GenerationError>) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(outcome);
        }
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Service<GenerationRequest> for ScriptedProvider {
    type Response = GenerationResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GenerationRequest) -> Self::Future {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(req);
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        Box::pin(async move {
            match next {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(e)) => Err(Box::new(e) as BoxError),
                None => Err(Box::new(GenerationError::malformed("script exhausted")) as BoxError),
            }
        })
    }
}
