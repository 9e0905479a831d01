//! Clipboard selection data kept by the compositor
//!
//! With `retain_selection` enabled the compositor keeps a copy of the
//! selection offered by a client, so that it survives the client going away.

/// Selection contents keyed by MIME type, in offer order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeData {
    entries: Vec<(String, Vec<u8>)>,
}

impl MimeData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data for `mime_type`, replacing any previous value
    pub fn set_data(&mut self, mime_type: impl Into<String>, data: impl Into<Vec<u8>>) {
        let mime_type = mime_type.into();
        let data = data.into();
        match self.entries.iter_mut().find(|(mime, _)| *mime == mime_type) {
            Some(entry) => entry.1 = data,
            None => self.entries.push((mime_type, data)),
        }
    }

    pub fn with_text(text: &str) -> Self {
        let mut data = Self::new();
        data.set_data("text/plain;charset=utf-8", text.as_bytes());
        data
    }

    pub fn data(&self, mime_type: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(mime, _)| mime == mime_type)
            .map(|(_, data)| data.as_slice())
    }

    pub fn has_format(&self, mime_type: &str) -> bool {
        self.data(mime_type).is_some()
    }

    pub fn formats(&self) -> Vec<&str> {
        self.entries.iter().map(|(mime, _)| mime.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SelectionState {
    pub(crate) retain: bool,
    pub(crate) override_data: Option<MimeData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_data_replaces_per_format() {
        let mut data = MimeData::with_text("hello");
        data.set_data("text/html", "<b>hello</b>");
        data.set_data("text/plain;charset=utf-8", "bye");
        assert_eq!(data.formats(), vec!["text/plain;charset=utf-8", "text/html"]);
        assert_eq!(data.data("text/plain;charset=utf-8"), Some(&b"bye"[..]));
        assert!(!data.has_format("image/png"));
    }
}
