//! Server-sent-event line parsing for upstream streams
//!
//! Splits a byte stream into SSE `data:` payloads with an idle timeout
//! between chunks. Event-name lines, comments and blank keep-alives are
//! dropped here; dialect-specific interpretation happens in the adapters.

use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use reqwest::Response;

use super::AdapterError;

/// Extract the payload of one SSE line, if it carries one
pub fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:").map(str::trim_start)
}

/// Stream of SSE `data:` payloads from an upstream response.
///
/// Each item is the payload with the `data:` prefix stripped; `[DONE]`
/// markers are passed through for the adapter to interpret. Waiting longer
/// than `idle` between network chunks fails the stream.
pub fn sse_lines(
    response: Response,
    idle: Duration,
    provider: String,
) -> impl Stream<Item = Result<String, AdapterError>> + Send {
    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = match tokio::time::timeout(idle, body.next()).await {
                Err(_) => {
                    yield Err(AdapterError::timeout(
                        &provider,
                        format!("no stream data for {}s", idle.as_secs()),
                    ));
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    yield Err(AdapterError::network(
                        &provider,
                        format!("stream read failed: {}", e),
                    ));
                    break;
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                if let Some(payload) = data_payload(line.trim_end_matches('\n')) {
                    yield Ok(payload.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_are_extracted() {
        assert_eq!(data_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(data_payload("data: [DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("data:payload"), Some("payload"));
    }

    #[test]
    fn non_data_lines_are_dropped() {
        assert_eq!(data_payload(""), None);
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload("event: message_start"), None);
        assert_eq!(data_payload("id: 42"), None);
    }

    #[test]
    fn carriage_returns_are_stripped() {
        assert_eq!(data_payload("data: hello\r"), Some("hello"));
    }
}
