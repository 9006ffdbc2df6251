//! Header carrier for trace-context propagation
//!
//! Exposes a message's headers as a flat text key/value bag so that a
//! `TextMapPropagator` can inject into or extract from them.

use opentelemetry::propagation::{Extractor, Injector};

use crate::{Header, Message};

/// Text key/value view over a message's headers
pub struct MessageCarrier<'a> {
    message: &'a mut Message,
}

impl<'a> MessageCarrier<'a> {
    pub fn new(message: &'a mut Message) -> Self {
        Self { message }
    }

    /// Value of the first header named `key`, or "" when absent or not UTF-8
    pub fn get(&self, key: &str) -> &str {
        self.message
            .header(key)
            .and_then(|v| std::str::from_utf8(v).ok())
            .unwrap_or("")
    }

    /// Appends a header. Existing headers with the same key are kept.
    pub fn set(&mut self, key: &str, value: &str) {
        self.message.headers.push(Header::new(key, value.as_bytes()));
    }

    /// All header keys in storage order
    pub fn keys(&self) -> Vec<&str> {
        self.message.headers.iter().map(|h| h.key.as_str()).collect()
    }
}

impl Extractor for MessageCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.message
            .header(key)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    fn keys(&self) -> Vec<&str> {
        MessageCarrier::keys(self)
    }
}

impl Injector for MessageCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.message.headers.push(Header::new(key, value));
    }
}
