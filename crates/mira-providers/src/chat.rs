use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Chat completion constrained to JSON output. The caller supplies the
/// temperature because different pipeline stages want different ones (fact
/// completion runs at 0, reflection near 0.1).
pub async fn chat(
	cfg: &mira_config::LlmProviderConfig,
	messages: &[Value],
	temperature: f32,
) -> Result<Value> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);

	for _ in 0..3 {
		let body = serde_json::json!({
			"model": cfg.model,
			"temperature": temperature,
			"messages": messages,
			"response_format": { "type": "json_object" },
		});
		let res = client
			.post(&url)
			.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		if let Ok(parsed) = parse_chat_json(json) {
			return Ok(parsed);
		}
	}

	Err(Error::InvalidResponse { message: "Chat response is not valid JSON.".to_string() })
}

fn parse_chat_json(json: Value) -> Result<Value> {
	if let Some(content) = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
	{
		let parsed: Value =
			serde_json::from_str(strip_code_fence(content)).map_err(|_| Error::InvalidResponse {
				message: "Chat content is not valid JSON.".to_string(),
			})?;

		return Ok(parsed);
	}

	if json.is_object() {
		return Ok(json);
	}

	Err(Error::InvalidResponse { message: "Chat response is missing JSON content.".to_string() })
}

/// Models occasionally wrap JSON in a markdown fence even when asked not to.
fn strip_code_fence(content: &str) -> &str {
	let trimmed = content.trim();
	let Some(rest) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let rest = rest.strip_prefix("json").unwrap_or(rest);

	rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_choice_content_json() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "{\"age\": 35}" } }
			]
		});
		let parsed = parse_chat_json(json).expect("parse failed");

		assert_eq!(parsed.get("age").and_then(|v| v.as_u64()), Some(35));
	}

	#[test]
	fn strips_markdown_fences() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "```json\n{\"ok\": true}\n```" } }
			]
		});
		let parsed = parse_chat_json(json).expect("parse failed");

		assert_eq!(parsed.get("ok").and_then(|v| v.as_bool()), Some(true));
	}

	#[test]
	fn rejects_non_json_content() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "no structured answer" } }
			]
		});

		assert!(parse_chat_json(json).is_err());
	}
}
