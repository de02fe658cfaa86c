//! Messages exchanged between a transport and its application handler.

/// Payload format of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// UTF-8 text
    Text,
    /// Opaque bytes
    Binary,
}

/// A single frame flowing through a connection's duplex channel.
///
/// The payload is opaque to the registry. Transports that fragment large
/// messages set `end_of_message` only on the final frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Payload format
    pub format: MessageFormat,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Whether this frame completes a logical message
    pub end_of_message: bool,
}

impl Message {
    /// Create a complete text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            format: MessageFormat::Text,
            payload: text.into().into_bytes(),
            end_of_message: true,
        }
    }

    /// Create a complete binary message.
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            format: MessageFormat::Binary,
            payload: payload.into(),
            end_of_message: true,
        }
    }

    /// Mark this frame as a fragment of a larger message.
    pub fn fragment(mut self) -> Self {
        self.end_of_message = false;
        self
    }

    /// The payload as text, if this is a text message holding valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.format {
            MessageFormat::Text => std::str::from_utf8(&self.payload).ok(),
            MessageFormat::Binary => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
