//! Streaming SSE transcoder.
//!
//! Consumes an upstream byte stream framed as Server-Sent Events and re-emits
//! a canonical SSE stream, one frame per `data:` event:
//!
//! - keep-alive comment lines (`: ...`) are forwarded verbatim;
//! - `data: [DONE]` is forwarded and terminates the stream;
//! - JSON chunks are rewritten into the canonical chunk shape with the
//!   concrete selected model substituted; chunks that fail to parse are
//!   dropped without ending the stream;
//! - blank upstream lines are forwarded to preserve keep-alive cadence.

use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use router_core::{FrameStream, RouterError};
use serde_json::{Map, Value};
use tracing::trace;

/// Terminal sentinel frame, forwarded bit-exact.
const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Transcode an upstream SSE byte stream into canonical frames.
///
/// `model` is the concrete model id selected for this request; it replaces
/// whatever model the upstream reports in each chunk. The stream is finite
/// (ends at `[DONE]` or upstream close) and stops processing as soon as the
/// consumer drops it.
pub fn transcode(
    upstream: BoxStream<'static, Result<Bytes, RouterError>>,
    model: String,
) -> FrameStream {
    let stream = try_stream! {
        let mut upstream = upstream;
        let mut buffer = String::new();
        // Every emitted frame already carries its event-terminating blank
        // line, so the blank that follows an upstream event is consumed
        // rather than forwarded twice. Standalone blanks still pass through.
        let mut swallow_blank = false;

        'outer: while let Some(chunk) = upstream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim_end_matches(['\n', '\r']);

                match parse_line(line) {
                    SseLine::Blank => {
                        if swallow_blank {
                            swallow_blank = false;
                        } else {
                            yield Bytes::from_static(b"\n");
                        }
                    }
                    SseLine::Comment => {
                        swallow_blank = true;
                        yield Bytes::from(format!("{line}\n\n"));
                    }
                    SseLine::Done => {
                        yield Bytes::from_static(DONE_FRAME);
                        break 'outer;
                    }
                    SseLine::Data(payload) => {
                        match serde_json::from_str::<Value>(payload) {
                            Ok(chunk) => {
                                swallow_blank = true;
                                let canonical = transform_chunk(&chunk, &model);
                                yield Bytes::from(format!("data: {canonical}\n\n"));
                            }
                            Err(e) => {
                                swallow_blank = false;
                                trace!(error = %e, "Dropping unparseable stream chunk");
                            }
                        }
                    }
                    SseLine::Other => {
                        swallow_blank = false;
                    }
                }
            }
        }
    };

    Box::pin(stream)
}

enum SseLine<'a> {
    Blank,
    Comment,
    Done,
    Data(&'a str),
    Other,
}

fn parse_line(line: &str) -> SseLine<'_> {
    if line.is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(": ") {
        return SseLine::Comment;
    }
    if let Some(payload) = line.strip_prefix("data: ") {
        if payload.trim() == "[DONE]" {
            return SseLine::Done;
        }
        return SseLine::Data(payload);
    }
    SseLine::Other
}

/// Rewrite one upstream chunk into the canonical chunk shape.
///
/// The upstream `id` and `created` fields pass through, the model is replaced
/// with the concrete selected model, and per-choice deltas keep every
/// non-null field they arrived with (including extension fields such as
/// reasoning or tool-call payloads). Usage totals, present only on final
/// chunks of some backends, pass through unmodified.
pub(crate) fn transform_chunk(chunk: &Value, model: &str) -> Value {
    let mut canonical = Map::new();

    if let Some(id) = chunk.get("id") {
        canonical.insert("id".to_string(), id.clone());
    }
    canonical.insert(
        "object".to_string(),
        Value::String("chat.completion.chunk".to_string()),
    );
    if let Some(created) = chunk.get("created") {
        canonical.insert("created".to_string(), created.clone());
    }
    canonical.insert("model".to_string(), Value::String(model.to_string()));

    let choices = chunk
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .enumerate()
                .map(|(position, choice)| transform_choice(choice, position))
                .collect()
        })
        .unwrap_or_default();
    canonical.insert("choices".to_string(), Value::Array(choices));

    if let Some(usage) = chunk.get("usage") {
        if !usage.is_null() {
            canonical.insert("usage".to_string(), usage.clone());
        }
    }

    Value::Object(canonical)
}

fn transform_choice(choice: &Value, position: usize) -> Value {
    // Delta from the upstream delta object, or synthesized from a bare
    // completion-style `text` field.
    let mut delta = match choice.get("delta").and_then(Value::as_object) {
        Some(delta) => delta.clone(),
        None => {
            let mut synthesized = Map::new();
            if let Some(text) = choice.get("text").and_then(Value::as_str) {
                synthesized.insert("content".to_string(), Value::String(text.to_string()));
            }
            synthesized
        }
    };
    delta.retain(|_, value| !value.is_null());

    let index = choice
        .get("index")
        .and_then(Value::as_u64)
        .unwrap_or(position as u64);

    let finish_reason = match choice.get("finish_reason") {
        Some(reason) if !reason.is_null() => reason.clone(),
        _ => choice
            .get("stop_reason")
            .cloned()
            .unwrap_or(Value::Null),
    };

    let mut canonical = Map::new();
    canonical.insert("index".to_string(), Value::from(index));
    canonical.insert("delta".to_string(), Value::Object(delta));
    canonical.insert("finish_reason".to_string(), finish_reason);
    Value::Object(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use futures_util::TryStreamExt;
    use serde_json::json;

    fn upstream_of(parts: &[&str]) -> BoxStream<'static, Result<Bytes, RouterError>> {
        let chunks: Vec<Result<Bytes, RouterError>> = parts
            .iter()
            .map(|part| Ok(Bytes::from((*part).to_string())))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    async fn collect_frames(
        parts: &[&str],
        model: &str,
    ) -> Vec<String> {
        transcode(upstream_of(parts), model.to_string())
            .map_ok(|frame| String::from_utf8_lossy(&frame).to_string())
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delta_chunk_then_done_yields_exactly_two_frames() {
        let frames = collect_frames(
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
                "data: [DONE]\n\n",
            ],
            "m1",
        )
        .await;

        assert_eq!(frames.len(), 2);
        let body: Value =
            serde_json::from_str(frames[0].strip_prefix("data: ").unwrap().trim()).unwrap();
        assert_eq!(body["object"], "chat.completion.chunk");
        assert_eq!(body["model"], "m1");
        assert_eq!(body["choices"][0]["delta"]["content"], "hi");
        assert_eq!(frames[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_standalone_blank_lines_are_forwarded() {
        // A blank line with no preceding event is keep-alive cadence.
        let frames = collect_frames(
            &[
                "\n",
                "data: {\"choices\":[]}\n\n\n",
                "data: [DONE]\n",
            ],
            "m",
        )
        .await;

        // leading blank, data frame (its terminator swallowed), extra blank, DONE
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], "\n");
        assert!(frames[1].starts_with("data: {"));
        assert_eq!(frames[2], "\n");
        assert_eq!(frames[3], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_frames_after_done_are_not_emitted() {
        let frames = collect_frames(
            &[
                "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
            ],
            "m",
        )
        .await;
        assert_eq!(frames, vec!["data: [DONE]\n\n"]);
    }

    #[tokio::test]
    async fn test_keepalive_comment_forwarded_verbatim() {
        let frames = collect_frames(&[": keep-alive\n"], "m").await;
        assert_eq!(frames, vec![": keep-alive\n\n"]);
    }

    #[tokio::test]
    async fn test_malformed_chunk_dropped_without_ending_stream() {
        let frames = collect_frames(
            &[
                "data: {not json}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
                "data: [DONE]\n",
            ],
            "m",
        )
        .await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"ok\""));
        assert_eq!(frames[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_chunk_split_across_network_reads() {
        let frames = collect_frames(
            &[
                "data: {\"choices\":[{\"del",
                "ta\":{\"content\":\"joined\"}}]}\n",
                "data: [DONE]\n",
            ],
            "m",
        )
        .await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("joined"));
    }

    #[test]
    fn test_transform_replaces_model_and_strips_null_delta_fields() {
        let chunk = json!({
            "id": "chatcmpl-abc",
            "created": 1_700_000_000,
            "model": "upstream-name",
            "choices": [{
                "index": 0,
                "delta": {"content": "hi", "role": null, "reasoning": "because"},
                "finish_reason": null
            }]
        });

        let canonical = transform_chunk(&chunk, "resolved-model");
        assert_eq!(canonical["id"], "chatcmpl-abc");
        assert_eq!(canonical["created"], 1_700_000_000);
        assert_eq!(canonical["model"], "resolved-model");

        let delta = canonical["choices"][0]["delta"].as_object().unwrap();
        assert_eq!(delta["content"], "hi");
        // Extension fields survive; null fields do not.
        assert_eq!(delta["reasoning"], "because");
        assert!(!delta.contains_key("role"));
        assert_eq!(canonical["choices"][0]["finish_reason"], Value::Null);
    }

    #[test]
    fn test_transform_synthesizes_delta_from_bare_text() {
        let chunk = json!({
            "id": "cmpl-1",
            "choices": [{"text": "legacy", "stop_reason": "stop"}]
        });

        let canonical = transform_chunk(&chunk, "m");
        assert_eq!(canonical["choices"][0]["delta"]["content"], "legacy");
        assert_eq!(canonical["choices"][0]["finish_reason"], "stop");
        assert_eq!(canonical["choices"][0]["index"], 0);
    }

    #[test]
    fn test_transform_passes_usage_through() {
        let chunk = json!({
            "id": "c",
            "choices": [],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        });

        let canonical = transform_chunk(&chunk, "m");
        assert_eq!(canonical["usage"]["total_tokens"], 8);
    }
}
