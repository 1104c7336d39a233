use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Query;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use callbridge_voice::{
    AudioEncoding, RecognitionConfig, RecognizerConfig, SpeechRecognizer, StreamingRecognizer,
    TranscriptEvent,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Stand-in engine: answers every audio frame with an interim result, and
/// every third frame with a final. Reports what it received on `seen`.
async fn listen_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    axum::Extension(seen): axum::Extension<mpsc::UnboundedSender<String>>,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let _ = seen.send(format!("auth={}", auth));
    let _ = seen.send(format!(
        "encoding={}",
        query.get("encoding").cloned().unwrap_or_default()
    ));
    ws.on_upgrade(move |socket| engine(socket, seen))
}

async fn engine(mut socket: WebSocket, seen: mpsc::UnboundedSender<String>) {
    let mut frames = 0usize;
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Binary(bytes) => {
                frames += 1;
                let _ = seen.send(format!("audio={}", bytes.len()));
                let interim = format!(
                    r#"{{"type":"Results","is_final":false,"channel":{{"alternatives":[{{"transcript":"partial {}"}}]}}}}"#,
                    frames
                );
                if socket.send(Message::Text(interim.into())).await.is_err() {
                    return;
                }
                if frames % 3 == 0 {
                    let fin = format!(
                        r#"{{"type":"Results","is_final":true,"channel":{{"alternatives":[{{"transcript":"final {}"}}]}}}}"#,
                        frames
                    );
                    if socket.send(Message::Text(fin.into())).await.is_err() {
                        return;
                    }
                }
            }
            Message::Text(text) => {
                let _ = seen.send(format!("text={}", text.as_str()));
                if text.as_str().contains("CloseStream") {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

async fn start_engine() -> (String, mpsc::UnboundedReceiver<String>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/v1/listen", get(listen_handler))
        .layer(axum::Extension(seen_tx));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{}/v1/listen", addr), seen_rx)
}

async fn next_transcript(
    stream: &mut callbridge_voice::RecognitionStream,
) -> Option<TranscriptEvent> {
    tokio::time::timeout(Duration::from_secs(5), stream.next_transcript())
        .await
        .expect("transcript should arrive")
}

#[tokio::test]
async fn streams_audio_and_yields_ordered_transcripts() {
    let (url, mut seen) = start_engine().await;
    let recognizer = StreamingRecognizer::new(RecognizerConfig {
        url,
        api_key: "dg-key".to_string(),
        ..RecognizerConfig::default()
    });

    let mut stream = recognizer
        .open(RecognitionConfig::default())
        .await
        .expect("stream opens");

    assert_eq!(seen.recv().await.unwrap(), "auth=Token dg-key");
    assert_eq!(seen.recv().await.unwrap(), "encoding=mulaw");

    for _ in 0..3 {
        stream.send(vec![0xFF; 160]);
    }

    assert_eq!(
        next_transcript(&mut stream).await,
        Some(TranscriptEvent::interim("partial 1"))
    );
    assert_eq!(
        next_transcript(&mut stream).await,
        Some(TranscriptEvent::interim("partial 2"))
    );
    assert_eq!(
        next_transcript(&mut stream).await,
        Some(TranscriptEvent::interim("partial 3"))
    );
    assert_eq!(
        next_transcript(&mut stream).await,
        Some(TranscriptEvent::final_text("final 3"))
    );

    for _ in 0..3 {
        assert_eq!(seen.recv().await.unwrap(), "audio=160");
    }

    stream.close();
    stream.close();
    let closing = tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("close frame should arrive")
        .unwrap();
    assert_eq!(closing, r#"text={"type":"CloseStream"}"#);
}

#[tokio::test]
async fn requests_linear16_when_configured() {
    let (url, mut seen) = start_engine().await;
    let recognizer = StreamingRecognizer::new(RecognizerConfig {
        url,
        ..RecognizerConfig::default()
    });
    let _stream = recognizer
        .open(RecognitionConfig {
            encoding: AudioEncoding::Linear16,
            ..RecognitionConfig::default()
        })
        .await
        .expect("stream opens");

    assert_eq!(seen.recv().await.unwrap(), "auth=");
    assert_eq!(seen.recv().await.unwrap(), "encoding=linear16");
}

#[tokio::test]
async fn unreachable_engine_fails_to_open() {
    let recognizer = StreamingRecognizer::new(RecognizerConfig {
        url: "ws://127.0.0.1:9/v1/listen".to_string(),
        ..RecognizerConfig::default()
    });
    assert!(recognizer.open(RecognitionConfig::default()).await.is_err());
}
