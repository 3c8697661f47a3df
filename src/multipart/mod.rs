//! Incremental decoding of request bodies.
//!
//! [`PostDecoder`] accepts body fragments as they arrive and emits an
//! ordered stream of [`HttpData`] items: form attributes and completed
//! file uploads. `application/x-www-form-urlencoded` bodies are decoded
//! in place; `multipart/form-data` parsing is delegated to the `multer`
//! crate behind this module's interface, so substituting the parser is a
//! one-file change. Uploads larger than [`MIN_SIZE`] spill to a temp file
//! allocated by the shared [`TempFileFactory`].
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::request;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

mod form;
mod multi;
mod temp;

pub use temp::{TempFile, TempFileFactory};

use form::UrlEncodedStream;
use multi::MultipartStream;

/// Bodies up to this size are kept in memory; larger ones spill to disk.
pub const MIN_SIZE: usize = 16 * 1024;

// ===== Data items =====

/// One decoded body item.
#[derive(Debug)]
pub enum HttpData {
    /// A form attribute.
    Attribute { name: String, value: String },
    /// A file upload, reported only once completed.
    Upload(FileUpload),
}

/// A completed file upload.
#[derive(Debug)]
pub struct FileUpload {
    name: String,
    filename: String,
    content_type: Option<String>,
    completed: bool,
    content: UploadContent,
}

#[derive(Debug)]
enum UploadContent {
    Memory(Bytes),
    Disk(TempFile),
}

impl FileUpload {
    /// Form-field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client-side filename.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// True once the terminating boundary was seen.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.content, UploadContent::Memory(_))
    }

    pub fn len(&self) -> usize {
        match &self.content {
            UploadContent::Memory(bytes) => bytes.len(),
            UploadContent::Disk(file) => std::fs::metadata(file.path())
                .map(|m| m.len() as usize)
                .unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole content, reading the backing file when spilled.
    pub fn bytes(&self) -> io::Result<Bytes> {
        match &self.content {
            UploadContent::Memory(bytes) => Ok(bytes.clone()),
            UploadContent::Disk(file) => file.read().map(Bytes::from),
        }
    }

    /// Backing file path when spilled to disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.content {
            UploadContent::Memory(_) => None,
            UploadContent::Disk(file) => Some(file.path()),
        }
    }

    /// Claim the backing file; the upload must be disk-backed. The caller
    /// becomes responsible for the file and it survives request cleanup.
    pub fn into_path(self) -> Option<PathBuf> {
        match self.content {
            UploadContent::Memory(_) => None,
            UploadContent::Disk(file) => Some(file.into_path()),
        }
    }
}

// ===== Decoder =====

/// Streaming decoder of one request body.
///
/// Feed fragments with [`offer`](PostDecoder::offer), the final one with
/// [`offer_last`](PostDecoder::offer_last), and drain completed items
/// through [`has_next`](PostDecoder::has_next) /
/// [`next`](PostDecoder::next). A `None` from `next` means not enough
/// data arrived yet; the caller defers to the next fragment.
#[derive(Debug)]
pub struct PostDecoder {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    UrlEncoded(UrlEncodedStream),
    Multipart(MultipartStream),
}

impl PostDecoder {
    /// Select the decoding mode from the request head. Any content type
    /// other than `multipart/form-data` decodes as url-encoded, matching
    /// lenient form handling. The selection is method-agnostic.
    pub fn new(parts: &request::Parts, factory: TempFileFactory) -> Result<Self, MultipartError> {
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let is_multipart = content_type
            .parse::<mime::Mime>()
            .map(|m| m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA)
            .unwrap_or(false);
        let inner = if is_multipart {
            let boundary = multer::parse_boundary(content_type).map_err(MultipartError::decoder)?;
            Inner::Multipart(MultipartStream::new(boundary, factory))
        } else {
            Inner::UrlEncoded(UrlEncodedStream::new())
        };
        Ok(Self { inner })
    }

    /// Feed one body fragment.
    pub fn offer(&mut self, data: &Bytes) -> Result<(), MultipartError> {
        match &mut self.inner {
            Inner::UrlEncoded(stream) => stream.offer(data),
            Inner::Multipart(stream) => stream.offer(data),
        }
    }

    /// Feed the terminator fragment (possibly empty).
    pub fn offer_last(&mut self, data: &Bytes) -> Result<(), MultipartError> {
        match &mut self.inner {
            Inner::UrlEncoded(stream) => stream.offer_last(data),
            Inner::Multipart(stream) => stream.offer_last(data),
        }
    }

    pub fn has_next(&self) -> bool {
        match &self.inner {
            Inner::UrlEncoded(stream) => stream.has_next(),
            Inner::Multipart(stream) => stream.has_next(),
        }
    }

    pub fn next(&mut self) -> Option<HttpData> {
        match &mut self.inner {
            Inner::UrlEncoded(stream) => stream.next(),
            Inner::Multipart(stream) => stream.next(),
        }
    }

    /// Drop undelivered items and their temp files.
    pub fn cleanup(&mut self) {
        match &mut self.inner {
            Inner::UrlEncoded(stream) => stream.cleanup(),
            Inner::Multipart(stream) => stream.cleanup(),
        }
    }
}

pub(crate) type Queue = VecDeque<HttpData>;

// ===== Error =====

/// Failure of the body decoder.
pub struct MultipartError {
    kind: ErrorKind,
}

enum ErrorKind {
    /// Malformed stream, refused by the parser.
    Decoder(String),
    /// End of stream reached with a part still incomplete.
    Incomplete(String),
    /// Spillover I/O failure.
    Io(io::Error),
}

impl MultipartError {
    fn decoder(err: multer::Error) -> Self {
        let message = err.to_string();
        let kind = match err {
            multer::Error::IncompleteStream | multer::Error::IncompleteFieldData { .. } => {
                ErrorKind::Incomplete(message)
            }
            _ => ErrorKind::Decoder(message),
        };
        Self { kind }
    }

    fn malformed(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Decoder(message.into()) }
    }

    fn io(err: io::Error) -> Self {
        Self { kind: ErrorKind::Io(err) }
    }

    /// True when the failure is the gateway's (I/O, truncation) rather
    /// than the client's; maps to 500 instead of 406.
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ErrorKind::Io(_) | ErrorKind::Incomplete(_))
    }
}

impl std::error::Error for MultipartError {}

impl fmt::Debug for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("MultipartError");
        match &self.kind {
            ErrorKind::Decoder(message) => f.field(message),
            ErrorKind::Incomplete(message) => f.field(message),
            ErrorKind::Io(err) => f.field(err),
        }
        .finish()
    }
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Decoder(message) => write!(f, "malformed body: {message}"),
            ErrorKind::Incomplete(message) => write!(f, "truncated body: {message}"),
            ErrorKind::Io(err) => write!(f, "spill failure: {err}"),
        }
    }
}
