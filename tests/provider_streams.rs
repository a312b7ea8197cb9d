mod common;

use polystream::protocol::gemini::stream::GeminiDecoder;
use polystream::{
    AnthropicStream, ContentItem, GeminiStream, OpenAiResponsesStream, StreamConfig, StreamError,
    StreamStatus,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{body, count, data_frames, drive, named_frames, statuses};

#[tokio::test]
async fn test_responses_done_events_do_not_duplicate_content() {
    let frames = named_frames(&[
        json!({"type":"response.created","response":{"id":"resp_1","status":"in_progress"}}),
        json!({"type":"response.output_item.added","output_index":0,"item":{"type":"message","id":"msg_1","role":"assistant"}}),
        json!({"type":"response.content_part.added","item_id":"msg_1","part":{"type":"output_text","text":""}}),
        json!({"type":"response.output_text.delta","item_id":"msg_1","delta":"Hello"}),
        json!({"type":"response.output_text.delta","item_id":"msg_1","delta":", world"}),
        json!({"type":"response.output_text.done","item_id":"msg_1","text":"Hello, world"}),
        json!({"type":"response.content_part.done","item_id":"msg_1","part":{"type":"output_text","text":"Hello, world"}}),
        json!({"type":"response.output_item.done","output_index":0,"item":{"type":"message","id":"msg_1","role":"assistant",
            "content":[{"type":"output_text","text":"Hello, world"}]}}),
        json!({"type":"response.completed","response":{"id":"resp_1","status":"completed",
            "usage":{"input_tokens":11,"output_tokens":3,"output_tokens_details":{"reasoning_tokens":0}}}}),
    ]);
    let mut stream = OpenAiResponsesStream::from_body(body(frames));
    let seen = drive(&mut stream).await;
    assert!(stream.err().is_none());
    assert_eq!(
        statuses(&seen),
        vec![StreamStatus::MessageStart, StreamStatus::Text, StreamStatus::Text]
    );
    let message = stream.message();
    assert_eq!(message.joined_text(), "Hello, world");
    assert_eq!(message.item_id(), Some("msg_1"));
    assert_eq!(stream.usage().input_tokens, 11);
}

#[tokio::test]
async fn test_responses_reasoning_precedes_function_call() {
    let frames = named_frames(&[
        json!({"type":"response.created","response":{"id":"resp_2"}}),
        json!({"type":"response.output_item.added","item":{"type":"reasoning","id":"rs_1"}}),
        json!({"type":"response.reasoning_summary_text.delta","item_id":"rs_1","delta":"Look it up."}),
        json!({"type":"response.reasoning_summary_text.done","item_id":"rs_1","text":"Look it up."}),
        json!({"type":"response.output_item.done","item":{"type":"reasoning","id":"rs_1",
            "summary":[{"type":"summary_text","text":"Look it up."}],"encrypted_content":"gAAAA"}}),
        json!({"type":"response.output_item.added","item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"lookup","arguments":""}}),
        json!({"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"{\"q\":"}),
        json!({"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"\"rust\"}"}),
        json!({"type":"response.function_call_arguments.done","item_id":"fc_1","arguments":"{\"q\":\"rust\"}"}),
        json!({"type":"response.output_item.done","item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"lookup","arguments":"{\"q\":\"rust\"}"}}),
        json!({"type":"response.completed","response":{"usage":{"input_tokens":5,"output_tokens":9,
            "output_tokens_details":{"reasoning_tokens":4}}}}),
    ]);
    let mut stream = OpenAiResponsesStream::from_body(body(frames));
    let mut thinking_done = None;
    let mut order = Vec::new();
    while let Some(status) = stream.next().await {
        if status == StreamStatus::ThinkingDone {
            thinking_done = stream.thought().cloned();
        }
        order.push(status);
    }
    assert!(stream.err().is_none());
    assert_eq!(
        order,
        vec![
            StreamStatus::MessageStart,
            StreamStatus::Thinking,
            StreamStatus::ThinkingDone,
            StreamStatus::ToolCallBegin,
            StreamStatus::ToolCallDelta,
            StreamStatus::ToolCallDelta,
            StreamStatus::ToolCallReady,
        ]
    );
    let thought = thinking_done.expect("ThinkingDone carries the full thought");
    assert_eq!(thought.text, "Look it up.");
    assert_eq!(thought.signature.as_deref(), Some("gAAAA"));
    assert_eq!(stream.usage().reasoning_tokens, 4);

    let message = stream.into_message().expect("completed");
    assert_eq!(message.tool_calls[0].item_id(), Some("fc_1"));
    assert_eq!(message.tool_calls[0].arguments, r#"{"q":"rust"}"#);
}

#[tokio::test]
async fn test_responses_failed_event_is_provider_error() {
    let frames = named_frames(&[
        json!({"type":"response.created","response":{"id":"resp_3"}}),
        json!({"type":"response.failed","response":{"status":"failed",
            "error":{"code":"server_error","message":"The model crashed"}}}),
    ]);
    let mut stream = OpenAiResponsesStream::from_body(body(frames));
    let seen = drive(&mut stream).await;
    assert_eq!(statuses(&seen), vec![StreamStatus::MessageStart]);
    assert!(matches!(
        stream.err(),
        Some(StreamError::Provider { status: 500, kind, message }) if kind == "server_error" && message == "The model crashed"
    ));
}

#[tokio::test]
async fn test_images_become_data_uris() {
    let gemini = data_frames(
        &[json!({"candidates":[{"content":{"role":"model","parts":[
            {"text":"Here it is:"},
            {"inlineData":{"mimeType":"image/png","data":"iVBORw0KGgo="}}
        ]}}]})],
        false,
    );
    let mut stream = GeminiStream::from_body(body(gemini));
    let mut image_url = None;
    while let Some(status) = stream.next().await {
        if status == StreamStatus::Image {
            image_url = stream.image().map(|img| img.url.clone());
        }
    }
    assert_eq!(image_url.as_deref(), Some("data:image/png;base64,iVBORw0KGgo="));

    let responses = named_frames(&[json!({"type":"response.output_item.done","item":{
        "type":"image_generation_call","id":"ig_1","status":"completed","result":"UklGRg==","output_format":"webp"}})]);
    let mut stream = OpenAiResponsesStream::from_body(body(responses));
    let seen = drive(&mut stream).await;
    assert_eq!(statuses(&seen), vec![StreamStatus::Image]);
    assert!(matches!(
        &stream.message().content[0],
        ContentItem::ImageUrl(img) if img.url == "data:image/webp;base64,UklGRg=="
    ));
}

#[tokio::test]
async fn test_anthropic_tool_use_closes_at_block_stop() {
    let frames = named_frames(&[
        json!({"type":"message_start","message":{"id":"msg_1","model":"m","usage":{"input_tokens":25,"output_tokens":1}}}),
        json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}),
        json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Need weather."}}),
        json!({"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"EqQBCkYIARgC"}}),
        json!({"type":"content_block_stop","index":0}),
        json!({"type":"ping"}),
        json!({"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"get_weather","input":{}}}),
        json!({"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":""}}),
        json!({"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"location\": \"Par"}}),
        json!({"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"is\"}"}}),
        json!({"type":"content_block_stop","index":1}),
        json!({"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":40}}),
        json!({"type":"message_stop"}),
    ]);
    let mut stream = AnthropicStream::from_body(body(frames));
    let seen = drive(&mut stream).await;
    assert!(stream.err().is_none());
    assert_eq!(
        statuses(&seen),
        vec![
            StreamStatus::MessageStart,
            StreamStatus::Thinking,
            StreamStatus::ThinkingDone,
            StreamStatus::ToolCallBegin,
            StreamStatus::ToolCallDelta,
            StreamStatus::ToolCallDelta,
            StreamStatus::ToolCallReady,
        ]
    );
    let usage = *stream.usage();
    assert_eq!((usage.input_tokens, usage.output_tokens), (25, 40));
    let message = stream.into_message().expect("completed");
    let call = &message.tool_calls[0];
    assert_eq!(call.id, "toolu_01");
    assert_eq!(call.arguments_value().expect("valid JSON"), json!({"location": "Paris"}));
    assert_eq!(
        message.thoughts().next().and_then(|t| t.signature.as_deref()),
        Some("EqQBCkYIARgC")
    );
}

#[tokio::test]
async fn test_gemini_parallel_one_shot_calls() {
    let frames = data_frames(
        &[json!({"candidates":[{"content":{"role":"model","parts":[
            {"functionCall":{"name":"get_time","args":{"tz":"UTC"}}},
            {"functionCall":{"name":"get_date","args":{}}}
        ]},"finishReason":"STOP"}]})],
        false,
    );
    let mut stream = GeminiStream::from_body(body(frames));
    let seen = drive(&mut stream).await;
    assert_eq!(count(&seen, StreamStatus::ToolCallBegin), 2);
    assert_eq!(count(&seen, StreamStatus::ToolCallReady), 2);
    let message = stream.message();
    assert_ne!(message.tool_calls[0].id, message.tool_calls[1].id);
}

#[tokio::test]
async fn test_error_bodies_parse_per_provider_shape() {
    let config = StreamConfig::default();
    let cases = [
        (
            http::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":400,"message":"Invalid argument","status":"INVALID_ARGUMENT"}}"#,
            "INVALID_ARGUMENT",
        ),
        (
            http::StatusCode::SERVICE_UNAVAILABLE,
            "upstream connect error",
            "http_error",
        ),
    ];
    for (status, text, expected_kind) in cases {
        let result = polystream::stream_from_parts(
            status,
            body(vec![text.to_string()]),
            GeminiDecoder::new(),
            &config,
            CancellationToken::new(),
        )
        .await;
        match result {
            Err(StreamError::Provider { status: got, kind, message }) => {
                assert_eq!(got, status.as_u16());
                assert_eq!(kind, expected_kind);
                assert!(!message.is_empty());
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("non-2xx must not open a stream"),
        }
    }
}
