use std::time::Duration;

use anyhow::{Error, Result, anyhow, bail};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

// Object {
//     "model": String("llama3.2:3b-instruct-fp16"),
//     "created_at": String("2024-10-01T12:00:00.000000Z"),
//     "message": Object {
//         "role": String("assistant"),
//         "content": String("Hello!")
//     },
//     "done": Bool(true)
// }
//
// The same shape is used for each line of a streamed response and
// for error responses, which only carry an `error` field.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

fn chat_url(api_hostname: &str) -> String {
    format!("{}/api/chat", api_hostname.trim_end_matches("/"))
}

fn status_error(status: reqwest::StatusCode, body: String) -> Error {
    let reason = serde_json::from_str::<ChatChunk>(&body)
        .ok()
        .and_then(|chunk| chunk.error)
        .unwrap_or(body);
    anyhow!("Ollama request failed with status {}: {}", status, reason)
}

async fn send(
    messages: &[Message],
    api_hostname: &str,
    model: &str,
    stream: bool,
) -> Result<reqwest::Response, Error> {
    let payload = json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });
    let response = reqwest::Client::new()
        .post(chat_url(api_hostname))
        .header("Content-Type", "application/json")
        .timeout(Duration::from_secs(60 * 10))
        .json(&payload)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, body));
    }

    Ok(response)
}

/// Sends the messages to the Ollama chat endpoint and returns the
/// content of the reply.
pub async fn completion(
    messages: &[Message],
    api_hostname: &str,
    model: &str,
) -> Result<String, Error> {
    let body = send(messages, api_hostname, model, false)
        .await?
        .text()
        .await?;

    let chunk = serde_json::from_str::<ChatChunk>(&body).inspect_err(|e| {
        tracing::error!("Parsing chat response failed for {}\nError:{}", body, e)
    })?;
    if let Some(err) = chunk.error {
        bail!("Ollama returned an error: {}", err);
    }

    chunk
        .message
        .map(|msg| msg.content)
        .ok_or(anyhow!("No message received. Resp:\n\n {}", body))
}

// Returns true once the final line of the stream has been seen
fn process_line(
    line: &str,
    tx: &mpsc::UnboundedSender<String>,
    content_buf: &mut String,
) -> Result<bool, Error> {
    let chunk = serde_json::from_str::<ChatChunk>(line).inspect_err(|e| {
        tracing::error!("Parsing chat chunk failed for {}\nError:{}", line, e)
    })?;
    if let Some(err) = chunk.error {
        bail!("Ollama returned an error: {}", err);
    }

    if let Some(msg) = chunk.message {
        if !msg.content.is_empty() {
            // The result is ignored here because the reply still
            // needs to be completed if the receiver went away
            let _ = tx.send(msg.content.clone());
            content_buf.push_str(&msg.content);
        }
    }

    Ok(chunk.done)
}

/// Sends the messages to the Ollama chat endpoint with streaming
/// enabled. Each fragment of the reply is forwarded to `tx` as it
/// arrives and the assembled reply is returned once the stream is
/// done.
pub async fn completion_stream(
    tx: mpsc::UnboundedSender<String>,
    messages: &[Message],
    api_hostname: &str,
    model: &str,
) -> Result<String, Error> {
    let response = send(messages, api_hostname, model, true).await?;
    let mut stream = response.bytes_stream();

    let mut content_buf = String::new();
    // Bytes rather than a string so multi-byte characters split
    // across network chunks are not mangled
    let mut buffer: Vec<u8> = Vec::new();
    let mut done = false;

    'outer: while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);

        // Ollama streams newline delimited JSON
        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = std::str::from_utf8(&line)?.trim();
            if line.is_empty() {
                continue;
            }

            if process_line(line, &tx, &mut content_buf)? {
                done = true;
                break 'outer;
            }
        }
    }

    // The final object is not always followed by a newline
    if !done {
        let rest = std::str::from_utf8(&buffer)?.trim();
        if !rest.is_empty() {
            done = process_line(rest, &tx, &mut content_buf)?;
        }
    }

    if !done {
        bail!("Stream ended before the reply was complete");
    }

    Ok(content_buf)
}
