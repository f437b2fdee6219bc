//! Anthropic Claude API client implementation
//!
//! Implements the LlmClient trait for Anthropic's Messages API. Structured
//! outputs (decompositions, contracts, summaries) are extracted from forced
//! tool calls; plain source generation reads the text content.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::domain::{Contract, Task, TaskSummary};
use crate::prompts::{self, PromptLibrary};

use super::types::{strip_code_fences, Decomposition, DecomposedTaskSpec, GenerationContext, RegenerationContext};
use super::{LlmClient, LlmError};

/// Anthropic Claude API client
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
    prompts: PromptLibrary,
}

/// Internal request for one Messages API call
struct CompletionRequest {
    system: String,
    user: String,
    tool: Option<ToolDefinition>,
    max_tokens: u32,
}

/// A tool the model is forced to call for structured output
struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    schema: serde_json::Value,
}

/// Parsed response: text content and the forced tool input, if any
struct CompletionResponse {
    content: Option<String>,
    tool_input: Option<serde_json::Value>,
}

impl AnthropicClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::InvalidResponse(format!("Environment variable {} not set", config.api_key_env)))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
            timeout,
            prompts: PromptLibrary::new(),
        })
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system,
            "messages": [{ "role": "user", "content": request.user }],
        });
        if let Some(tool) = &request.tool {
            body["tools"] = serde_json::json!([{
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.schema,
            }]);
            body["tool_choice"] = serde_json::json!({ "type": "tool", "name": tool.name });
        }
        body
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let send = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let api_response: AnthropicResponse = response.json().await?;
        let mut content = None;
        let mut tool_input = None;
        for block in api_response.content {
            match block {
                AnthropicContentBlock::Text { text } => content = Some(text),
                AnthropicContentBlock::ToolUse { input, .. } => tool_input = Some(input),
            }
        }
        Ok(CompletionResponse { content, tool_input })
    }

    /// Extract the forced tool input, or fail with InvalidResponse
    fn require_tool_input(response: CompletionResponse, tool: &str) -> Result<serde_json::Value, LlmError> {
        response
            .tool_input
            .ok_or_else(|| LlmError::InvalidResponse(format!("model did not call {}", tool)))
    }

    /// Extract non-empty text content
    fn require_content(response: CompletionResponse) -> Result<String, LlmError> {
        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(LlmError::Empty),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn decompose(&self, request: &str, context: &str) -> Result<Decomposition, LlmError> {
        let user = self
            .prompts
            .render_decompose(request, context)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = self
            .complete(CompletionRequest {
                system: prompts::DECOMPOSE_SYSTEM.to_string(),
                user,
                tool: Some(ToolDefinition {
                    name: "submit_decomposition",
                    description: "Submit the full task decomposition. Call once with every task.",
                    schema: decomposition_schema(),
                }),
                max_tokens: self.max_tokens,
            })
            .await?;
        let input = Self::require_tool_input(response, "submit_decomposition")?;
        let decomposition: Decomposition = serde_json::from_value(input)?;
        if decomposition.tasks.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(decomposition)
    }

    async fn generate_contracts(&self, request: &str, tasks: &[Task]) -> Result<Vec<Contract>, LlmError> {
        let user = self
            .prompts
            .render_contracts(request, tasks)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = self
            .complete(CompletionRequest {
                system: prompts::CONTRACTS_SYSTEM.to_string(),
                user,
                tool: Some(ToolDefinition {
                    name: "submit_contracts",
                    description: "Submit the shared type contracts the plan implies.",
                    schema: contracts_schema(),
                }),
                max_tokens: self.max_tokens,
            })
            .await?;
        let input = Self::require_tool_input(response, "submit_contracts")?;
        let contracts = input
            .get("contracts")
            .cloned()
            .ok_or_else(|| LlmError::InvalidResponse("missing 'contracts' in tool input".to_string()))?;
        Ok(serde_json::from_value(contracts)?)
    }

    async fn generate(&self, task: &Task, context: &GenerationContext) -> Result<String, LlmError> {
        let user = self
            .prompts
            .render_generate(task, context)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = self
            .complete(CompletionRequest {
                system: prompts::GENERATE_SYSTEM.to_string(),
                user,
                tool: None,
                max_tokens: self.max_tokens,
            })
            .await?;
        Ok(strip_code_fences(&Self::require_content(response)?))
    }

    async fn regenerate(&self, task: &Task, context: &RegenerationContext) -> Result<String, LlmError> {
        let user = self
            .prompts
            .render_regenerate(task, context)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = self
            .complete(CompletionRequest {
                system: prompts::GENERATE_SYSTEM.to_string(),
                user,
                tool: None,
                max_tokens: self.max_tokens,
            })
            .await?;
        Ok(strip_code_fences(&Self::require_content(response)?))
    }

    async fn summarize(&self, task: &Task, source: &str) -> Result<TaskSummary, LlmError> {
        let user = self
            .prompts
            .render_summarize(task, source)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = self
            .complete(CompletionRequest {
                system: prompts::SUMMARIZE_SYSTEM.to_string(),
                user,
                tool: Some(ToolDefinition {
                    name: "submit_summary",
                    description: "Submit the summary of the generated code.",
                    schema: summary_schema(),
                }),
                max_tokens: 2048,
            })
            .await?;
        let input = Self::require_tool_input(response, "submit_summary")?;
        Ok(serde_json::from_value(input)?)
    }

    async fn decompose_complex(&self, task: &Task, max_lines: u32) -> Result<Vec<DecomposedTaskSpec>, LlmError> {
        let user = self
            .prompts
            .render_split(task, max_lines)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = self
            .complete(CompletionRequest {
                system: prompts::SPLIT_SYSTEM.to_string(),
                user,
                tool: Some(ToolDefinition {
                    name: "submit_subtasks",
                    description: "Submit the subtasks replacing the oversize task.",
                    schema: subtasks_schema(),
                }),
                max_tokens: self.max_tokens,
            })
            .await?;
        let input = Self::require_tool_input(response, "submit_subtasks")?;
        let tasks = input
            .get("tasks")
            .cloned()
            .ok_or_else(|| LlmError::InvalidResponse("missing 'tasks' in tool input".to_string()))?;
        let specs: Vec<DecomposedTaskSpec> = serde_json::from_value(tasks)?;
        if specs.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(specs)
    }
}

fn task_spec_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "description": "Short unique id, e.g. 'models'" },
            "description": { "type": "string" },
            "dependencies": { "type": "array", "items": { "type": "string" } },
            "expected_types": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Type names this task defines, in order"
            },
            "consumed_types": {
                "type": "object",
                "additionalProperties": { "type": "array", "items": { "type": "string" } },
                "description": "Dependency task id -> type names imported from it"
            },
            "required_libraries": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["id", "description"]
    })
}

fn decomposition_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "description": { "type": "string" },
            "tasks": { "type": "array", "items": task_spec_schema() }
        },
        "required": ["description", "tasks"]
    })
}

fn subtasks_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "tasks": { "type": "array", "items": task_spec_schema() }
        },
        "required": ["tasks"]
    })
}

fn contracts_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "contracts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "namespace": { "type": "string" },
                        "source_task_id": { "type": "string" },
                        "kind": {
                            "type": "object",
                            "description": "Tagged contract body; 'variant' is one of enum, interface, model, abstract_base"
                        }
                    },
                    "required": ["name", "namespace", "source_task_id", "kind"]
                }
            }
        },
        "required": ["contracts"]
    })
}

fn summary_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "purpose": { "type": "string" },
            "key_behaviors": { "type": "array", "items": { "type": "string" } },
            "edge_cases": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["purpose", "key_behaviors", "edge_cases"]
    })
}

// Anthropic API response types

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[allow(dead_code)]
        id: String,
        #[allow(dead_code)]
        name: String,
        input: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> AnthropicClient {
        AnthropicClient {
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            http: Client::new(),
            max_tokens: 8192,
            timeout: Duration::from_secs(120),
            prompts: PromptLibrary::new(),
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let client = test_client();
        let body = client.build_request_body(&CompletionRequest {
            system: "You are helpful".to_string(),
            user: "Hello".to_string(),
            tool: None,
            max_tokens: 1000,
        });
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["system"], "You are helpful");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_body_forces_tool() {
        let client = test_client();
        let body = client.build_request_body(&CompletionRequest {
            system: "s".to_string(),
            user: "u".to_string(),
            tool: Some(ToolDefinition {
                name: "submit_summary",
                description: "d",
                schema: summary_schema(),
            }),
            max_tokens: 1000,
        });
        assert_eq!(body["tools"][0]["name"], "submit_summary");
        assert_eq!(body["tool_choice"]["name"], "submit_summary");
    }

    #[test]
    fn test_max_tokens_capped() {
        let client = test_client();
        let body = client.build_request_body(&CompletionRequest {
            system: "s".to_string(),
            user: "u".to_string(),
            tool: None,
            max_tokens: 99_999,
        });
        assert_eq!(body["max_tokens"], 8192);
    }

    #[test]
    fn test_parse_response_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "id": "tu_1", "name": "submit_summary", "input": {"purpose": "p", "key_behaviors": [], "edge_cases": []}}
            ]
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.content.len(), 2);
    }

    #[test]
    fn test_require_content_rejects_empty() {
        let response = CompletionResponse {
            content: Some("   ".to_string()),
            tool_input: None,
        };
        assert!(matches!(
            AnthropicClient::require_content(response),
            Err(LlmError::Empty)
        ));
    }
}
