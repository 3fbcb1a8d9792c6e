use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Embeds one input, shortening it when the model reports a context
    /// overflow.
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            anyhow::bail!("cannot embed empty text input");
        }

        let err = match self.embed_one(model, input).await {
            Ok(vector) => return Ok(vector),
            Err(err) if is_context_length_error(&err) => err,
            Err(err) => return Err(err),
        };

        let word_count = input.split_whitespace().count();
        let mut last_err = err;
        for max_words in [400usize, 320, 240, 180, 120] {
            if word_count <= max_words {
                continue;
            }
            let truncated = truncate_to_word_limit(input, max_words);
            match self.embed_one(model, &truncated).await {
                Ok(vector) => {
                    tracing::debug!(word_count, max_words, "embedded truncated input");
                    return Ok(vector);
                }
                Err(next) if is_context_length_error(&next) => last_err = next,
                Err(next) => return Err(next),
            }
        }

        Err(last_err.context(format!(
            "embedding input exceeds model context even after truncation ({word_count} words)"
        )))
    }

    async fn embed_one(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let batch = [text.to_string()];
        let modern_err = match self.embed_batch(model, &batch).await {
            Ok(mut vectors) => {
                return vectors
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("ollama /api/embed returned no embeddings"))
            }
            Err(err) if is_context_length_error(&err) => return Err(err),
            Err(err) => err,
        };

        // Older Ollama releases only expose /api/embeddings.
        self.embed_legacy(model, text).await.map_err(|legacy_err| {
            anyhow::anyhow!(
                "ollama embedding failed via /api/embed and /api/embeddings. \
                 modern error: {modern_err}; legacy error: {legacy_err}; \
                 ensure the embedding model is pulled (e.g. `ollama pull {model}`)"
            )
        })
    }

    async fn embed_legacy(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbeddingReq<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingResp {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbeddingReq {
                model,
                prompt: text,
            })
            .send()
            .await
            .context("failed to call ollama embeddings endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "ollama /api/embeddings returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<EmbeddingResp>()
            .await
            .context("failed to decode ollama embeddings response")?;

        Ok(response.embedding)
    }

    /// Embeds several inputs in one request, returning vectors in input order.
    pub async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        #[derive(Serialize)]
        struct EmbedBatchReq<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbedBatchReq {
                model,
                input: texts,
            })
            .send()
            .await
            .context("failed to call ollama embed endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "ollama /api/embed returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<EmbedResp>()
            .await
            .context("failed to decode ollama /api/embed response")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "ollama /api/embed returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            );
        }

        Ok(response.embeddings)
    }

    pub async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
        num_predict: usize,
        temperature: f32,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            stream: bool,
            options: ChatOptions,
        }

        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ChatOptions {
            num_predict: usize,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            message: ChatRespMessage,
        }

        #[derive(Deserialize)]
        struct ChatRespMessage {
            content: String,
        }

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&ChatReq {
                model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: system,
                    },
                    ChatMessage {
                        role: "user",
                        content: user,
                    },
                ],
                stream: false,
                options: ChatOptions {
                    num_predict,
                    temperature,
                },
            })
            .send()
            .await
            .context("failed to call ollama chat endpoint")?
            .error_for_status()
            .context("ollama chat returned non-success status")?
            .json::<ChatResp>()
            .await
            .context("failed to decode ollama chat response")?;

        Ok(response.message.content.trim().to_string())
    }
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}

fn is_context_length_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("input length exceeds the context length")
        || (msg.contains("context length") && msg.contains("input length"))
}

fn truncate_to_word_limit(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_prefers_json_error_field() {
        assert_eq!(
            normalize_err_body(r#"{"error":"model not found"}"#),
            "model not found"
        );
        assert_eq!(normalize_err_body("  "), "<empty body>");
        assert_eq!(normalize_err_body("bad gateway"), "bad gateway");
    }

    #[test]
    fn detects_context_length_errors() {
        let err = anyhow::anyhow!(
            "ollama /api/embed returned 500: the input length exceeds the context length"
        );
        assert!(is_context_length_error(&err));
        assert!(!is_context_length_error(&anyhow::anyhow!("connection refused")));
    }

    #[test]
    fn truncates_on_word_boundaries() {
        assert_eq!(truncate_to_word_limit("a  b\nc d", 3), "a b c");
        assert_eq!(truncate_to_word_limit("short", 10), "short");
    }
}
