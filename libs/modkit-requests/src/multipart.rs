//! `multipart/form-data` encoding for file uploads.

use bytes::Bytes;
use rand::Rng;
use std::fmt::Write as _;

/// In-memory `multipart/form-data` body
#[derive(Debug)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    /// Empty form with a random boundary
    #[must_use]
    pub fn new() -> Self {
        let mut raw = [0u8; 30];
        rand::rng().fill(&mut raw);
        let boundary = raw.iter().fold(String::with_capacity(60), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        });
        Self::with_boundary(boundary)
    }

    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", mime::MULTIPART_FORM_DATA, self.boundary)
    }

    /// Append a file part
    pub fn file(&mut self, field: &str, file_name: &str, content: &[u8]) -> &mut Self {
        self.part_header(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}",
            escape_quotes(field),
            escape_quotes(file_name),
            mime::APPLICATION_OCTET_STREAM
        ));
        self.body.extend_from_slice(content);
        self
    }

    /// Append a plain text field
    pub fn field(&mut self, name: &str, value: &str) -> &mut Self {
        self.part_header(&format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape_quotes(name)
        ));
        self.body.extend_from_slice(value.as_bytes());
        self
    }

    fn part_header(&mut self, headers: &str) {
        if !self.body.is_empty() {
            self.body.extend_from_slice(b"\r\n");
        }
        self.body
            .extend_from_slice(format!("--{}\r\n{headers}\r\n\r\n", self.boundary).as_bytes());
    }

    /// Close the form and return the encoded body
    #[must_use]
    pub fn finish(mut self) -> Bytes {
        if !self.body.is_empty() {
            self.body.extend_from_slice(b"\r\n");
        }
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Bytes::from(self.body)
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_random_boundary() {
        let a = MultipartForm::new();
        let b = MultipartForm::new();
        assert_eq!(a.boundary().len(), 60);
        assert_ne!(a.boundary(), b.boundary());
        assert!(a.content_type().starts_with("multipart/form-data; boundary="));
    }

    #[test]
    fn test_encoding() {
        let mut form = MultipartForm::with_boundary("XYZ");
        form.file("file", "report \"q1\".csv", b"a,b\n1,2")
            .field("filename", "report.csv");
        let body = String::from_utf8(form.finish().to_vec()).unwrap();

        assert_eq!(
            body,
            "--XYZ\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"report \\\"q1\\\".csv\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             a,b\n1,2\r\n\
             --XYZ\r\n\
             Content-Disposition: form-data; name=\"filename\"\r\n\r\n\
             report.csv\r\n\
             --XYZ--\r\n"
        );
    }

    #[test]
    fn test_empty_form() {
        let form = MultipartForm::with_boundary("B");
        assert_eq!(form.finish(), Bytes::from_static(b"--B--\r\n"));
    }
}
