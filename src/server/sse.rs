//! Server-sent-event framing for streamed responses

use actix_web::web;

/// One SSE event, `data: <payload>\n\n` framed
#[derive(Debug, Clone, Default)]
pub struct Event {
    data: String,
}

impl Event {
    /// Event carrying a JSON payload
    pub fn data(payload: impl Into<String>) -> Self {
        Self {
            data: payload.into(),
        }
    }

    /// The terminal marker every stream ends with
    pub fn done() -> Self {
        Self {
            data: "[DONE]".to_string(),
        }
    }

    /// Wire bytes
    pub fn to_bytes(&self) -> web::Bytes {
        web::Bytes::from(format!("data: {}\n\n", self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_is_data_prefixed_with_blank_line() {
        assert_eq!(Event::data("{\"a\":1}").to_bytes(), "data: {\"a\":1}\n\n");
        assert_eq!(Event::done().to_bytes(), "data: [DONE]\n\n");
    }
}
