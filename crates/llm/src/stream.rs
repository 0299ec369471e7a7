//! Streaming multiplexer.
//!
//! Merges the loop's late-arriving metadata into a single downstream
//! sequence: every text chunk in source order, then at most one usage frame,
//! then at most one duration frame, then close. A failure after the stream
//! has begun closes the output with no trailers, never a partial frame; the
//! client infers truncation from the missing trailers.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::{Stream, StreamExt, future::BoxFuture, stream};
use serde::Serialize;

use crate::{
    chat::ChatStream,
    messages::{DurationUsage, TokenUsage},
    provider::TextStream,
};

/// One event frame of the chat stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum StreamFrame {
    /// A text chunk of the terminal answer.
    Text(String),
    /// Cumulative token usage; exactly once, after all text.
    Usage(TokenUsage),
    /// Cumulative timings; exactly once, after usage.
    Duration(DurationUsage),
}

enum MuxState {
    Text(ChatStream),
    Duration(BoxFuture<'static, Option<DurationUsage>>),
    Done,
}

/// The ordered frame sequence `text* usage? duration?`.
pub fn event_frames(chat: ChatStream) -> impl Stream<Item = StreamFrame> + Send {
    stream::unfold(MuxState::Text(chat), |state| async move {
        match state {
            MuxState::Text(mut chat) => {
                match tokio::time::timeout(chat.read_timeout, chat.text.next()).await {
                    Err(_) => {
                        log::warn!("stream read deadline fired; closing without trailers");
                        None
                    }
                    Ok(Some(Ok(chunk))) => Some((StreamFrame::Text(chunk), MuxState::Text(chat))),
                    Ok(Some(Err(e))) => {
                        log::error!("upstream stream failed: {e}; closing without trailers");
                        None
                    }
                    Ok(None) => match chat.usage.await {
                        Some(usage) => Some((
                            StreamFrame::Usage(usage),
                            MuxState::Duration(chat.duration),
                        )),
                        None => chat
                            .duration
                            .await
                            .map(|duration| (StreamFrame::Duration(duration), MuxState::Done)),
                    },
                }
            }
            MuxState::Duration(duration) => duration
                .await
                .map(|duration| (StreamFrame::Duration(duration), MuxState::Done)),
            MuxState::Done => None,
        }
    })
}

/// Raw framing: the text chunks alone, no trailers.
pub fn raw_frames(chat: ChatStream) -> TextStream {
    chat.text
}

/// Frames wrapped for an SSE response body (`data: <json>\n\n` each).
pub fn sse_events(chat: ChatStream) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    event_frames(chat).map(|frame| {
        let json = sonic_rs::to_string(&frame).unwrap_or_else(|e| {
            log::error!("failed to serialize stream frame: {e}");
            r#"{"type":"text","payload":""}"#.to_string()
        });

        Ok(Event::default().data(json))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, channel::oneshot};
    use std::time::Duration;

    fn chat_stream(
        chunks: Vec<crate::Result<String>>,
        usage: Option<TokenUsage>,
        duration: Option<DurationUsage>,
    ) -> ChatStream {
        ChatStream {
            text: Box::pin(stream::iter(chunks)),
            usage: futures::future::ready(usage).boxed(),
            duration: futures::future::ready(duration).boxed(),
            read_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn frames_are_text_then_usage_then_duration() {
        let chat = chat_stream(
            vec![Ok("he".to_string()), Ok("llo".to_string()), Ok("!".to_string())],
            Some(TokenUsage::new(1, 3)),
            Some(DurationUsage {
                total_duration: 7,
                ..Default::default()
            }),
        );

        let frames: Vec<StreamFrame> = event_frames(chat).collect().await;

        assert_eq!(
            frames,
            vec![
                StreamFrame::Text("he".to_string()),
                StreamFrame::Text("llo".to_string()),
                StreamFrame::Text("!".to_string()),
                StreamFrame::Usage(TokenUsage::new(1, 3)),
                StreamFrame::Duration(DurationUsage {
                    total_duration: 7,
                    ..Default::default()
                }),
            ]
        );
    }

    #[tokio::test]
    async fn missing_usage_still_emits_duration() {
        let chat = chat_stream(
            vec![Ok("hi".to_string())],
            None,
            Some(DurationUsage::default()),
        );

        let frames: Vec<StreamFrame> = event_frames(chat).collect().await;

        assert_eq!(
            frames,
            vec![
                StreamFrame::Text("hi".to_string()),
                StreamFrame::Duration(DurationUsage::default()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_trailers_close_after_text() {
        let chat = chat_stream(vec![Ok("hi".to_string())], None, None);

        let frames: Vec<StreamFrame> = event_frames(chat).collect().await;

        assert_eq!(frames, vec![StreamFrame::Text("hi".to_string())]);
    }

    #[tokio::test]
    async fn raw_framing_forwards_text_and_drops_trailers() {
        let chat = chat_stream(
            vec![Ok("he".to_string()), Ok("llo".to_string())],
            Some(TokenUsage::new(1, 3)),
            Some(DurationUsage::default()),
        );

        let chunks: Vec<String> = raw_frames(chat)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["he".to_string(), "llo".to_string()]);
    }

    #[tokio::test]
    async fn upstream_error_closes_without_trailers() {
        let chat = chat_stream(
            vec![
                Ok("partial".to_string()),
                Err(crate::LlmError::Transport("reset".to_string())),
            ],
            Some(TokenUsage::new(1, 1)),
            Some(DurationUsage::default()),
        );

        let frames: Vec<StreamFrame> = event_frames(chat).collect().await;

        // The text before the failure is delivered; no trailer follows it.
        assert_eq!(frames, vec![StreamFrame::Text("partial".to_string())]);
    }

    #[tokio::test]
    async fn stalled_stream_hits_the_read_deadline() {
        let (_tx, rx) = futures::channel::mpsc::channel::<crate::Result<String>>(1);

        let chat = ChatStream {
            text: Box::pin(rx),
            usage: futures::future::ready(Some(TokenUsage::new(1, 1))).boxed(),
            duration: futures::future::ready(None).boxed(),
            read_timeout: Duration::from_millis(20),
        };

        let frames: Vec<StreamFrame> = event_frames(chat).collect().await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn trailers_wait_for_late_metadata() {
        let (usage_tx, usage_rx) = oneshot::channel();

        let chat = ChatStream {
            text: Box::pin(stream::iter(vec![crate::Result::Ok("hi".to_string())])),
            usage: usage_rx.map(Result::ok).boxed(),
            duration: futures::future::ready(None).boxed(),
            read_timeout: Duration::from_secs(5),
        };

        let collector = tokio::spawn(event_frames(chat).collect::<Vec<StreamFrame>>());

        // Resolve the metadata only after the consumer is already waiting.
        tokio::time::sleep(Duration::from_millis(10)).await;
        usage_tx.send(TokenUsage::new(2, 2)).unwrap();

        let frames = collector.await.unwrap();
        assert_eq!(
            frames,
            vec![
                StreamFrame::Text("hi".to_string()),
                StreamFrame::Usage(TokenUsage::new(2, 2)),
            ]
        );
    }

    #[test]
    fn frames_serialize_to_the_wire_contract() {
        let frame = StreamFrame::Text("he".to_string());
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"text","payload":"he"}"#
        );

        let frame = StreamFrame::Usage(TokenUsage::new(1, 3));
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"usage","payload":{"prompt_tokens":1,"completion_tokens":3,"total_tokens":4}}"#
        );

        let frame = StreamFrame::Duration(DurationUsage::default());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "duration");
        assert_eq!(json["payload"]["total_duration"], 0);
    }
}
