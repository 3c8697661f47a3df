//! `multipart/form-data` decoding on top of the `multer` parser.
//!
//! The parser is an async stream consumer; here it is driven manually: a
//! fragment channel feeds it, and every `offer` polls the parse future
//! with a no-op waker. Completed items land in a queue drained by the
//! engine between fragments.
use bytes::{Bytes, BytesMut};
use futures_channel::mpsc;
use futures_util::task::noop_waker;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use super::temp::{TempFile, TempFileFactory};
use super::{FileUpload, HttpData, MIN_SIZE, MultipartError, Queue, UploadContent};

type SharedQueue = Arc<Mutex<Queue>>;
type Fragment = Result<Bytes, Infallible>;
type ParseFuture = Pin<Box<dyn Future<Output = Result<(), MultipartError>> + Send>>;

pub struct MultipartStream {
    tx: Option<mpsc::UnboundedSender<Fragment>>,
    queue: SharedQueue,
    parse: ParseFuture,
    state: State,
}

#[derive(PartialEq)]
enum State {
    Running,
    Done,
    Failed,
}

impl MultipartStream {
    pub(super) fn new(boundary: String, factory: TempFileFactory) -> Self {
        let (tx, rx) = mpsc::unbounded::<Fragment>();
        let queue = SharedQueue::default();
        let parse = Box::pin(parse_loop(rx, boundary, queue.clone(), factory));
        Self {
            tx: Some(tx),
            queue,
            parse,
            state: State::Running,
        }
    }

    pub(super) fn offer(&mut self, data: &Bytes) -> Result<(), MultipartError> {
        if let Some(tx) = &self.tx {
            if !data.is_empty() {
                // receiver owned by the parse future, send cannot fail
                // while it is still running
                let _ = tx.unbounded_send(Ok(data.clone()));
            }
        }
        self.drive()
    }

    pub(super) fn offer_last(&mut self, data: &Bytes) -> Result<(), MultipartError> {
        if let Some(tx) = self.tx.take() {
            if !data.is_empty() {
                let _ = tx.unbounded_send(Ok(data.clone()));
            }
        }
        self.drive()
    }

    pub(super) fn has_next(&self) -> bool {
        !self.queue.lock().expect("item queue").is_empty()
    }

    pub(super) fn next(&mut self) -> Option<HttpData> {
        self.queue.lock().expect("item queue").pop_front()
    }

    pub(super) fn cleanup(&mut self) {
        // dropping queued uploads removes their temp files; dropping the
        // parse future removes any file still being written
        self.queue.lock().expect("item queue").clear();
        self.tx = None;
        if self.state == State::Running {
            self.state = State::Failed;
            self.parse = Box::pin(std::future::ready(Ok(())));
        }
    }

    fn drive(&mut self) -> Result<(), MultipartError> {
        if self.state != State::Running {
            return Ok(());
        }
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match self.parse.as_mut().poll(&mut cx) {
            Poll::Pending => Ok(()),
            Poll::Ready(Ok(())) => {
                self.state = State::Done;
                Ok(())
            }
            Poll::Ready(Err(err)) => {
                self.state = State::Failed;
                Err(err)
            }
        }
    }
}

impl fmt::Debug for MultipartStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartStream").finish_non_exhaustive()
    }
}

// ===== Parse loop =====

async fn parse_loop(
    rx: mpsc::UnboundedReceiver<Fragment>,
    boundary: String,
    queue: SharedQueue,
    factory: TempFileFactory,
) -> Result<(), MultipartError> {
    let mut multipart = multer::Multipart::new(rx, boundary);
    while let Some(mut field) = multipart.next_field().await.map_err(MultipartError::decoder)? {
        let name = field.name().unwrap_or("").to_owned();
        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(|m| m.to_string());
        match filename {
            None => {
                let mut value = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(MultipartError::decoder)? {
                    value.extend_from_slice(&chunk);
                }
                let value = String::from_utf8_lossy(&value).into_owned();
                queue
                    .lock()
                    .expect("item queue")
                    .push_back(HttpData::Attribute { name, value });
            }
            Some(filename) => {
                let mut memory = BytesMut::new();
                let mut spill: Option<TempFile> = None;
                while let Some(chunk) = field.chunk().await.map_err(MultipartError::decoder)? {
                    match spill.as_mut() {
                        Some(file) => file.write_all(&chunk).map_err(MultipartError::io)?,
                        None if memory.len() + chunk.len() > MIN_SIZE => {
                            let mut file = factory.create().map_err(MultipartError::io)?;
                            file.write_all(&memory).map_err(MultipartError::io)?;
                            file.write_all(&chunk).map_err(MultipartError::io)?;
                            memory.clear();
                            spill = Some(file);
                        }
                        None => memory.extend_from_slice(&chunk),
                    }
                }
                let content = match spill {
                    Some(mut file) => {
                        file.finish().map_err(MultipartError::io)?;
                        UploadContent::Disk(file)
                    }
                    None => UploadContent::Memory(memory.freeze()),
                };
                queue.lock().expect("item queue").push_back(HttpData::Upload(FileUpload {
                    name,
                    filename,
                    content_type,
                    completed: true,
                    content,
                }));
            }
        }
    }
    Ok(())
}

// ===== Test =====

#[cfg(test)]
mod test {
    use super::*;

    const BOUNDARY: &str = "torii-test-boundary";

    fn factory() -> TempFileFactory {
        TempFileFactory::new(std::env::temp_dir().join("torii-test-multi")).unwrap()
    }

    fn body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, filename, data) in parts {
            out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(filename) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        out
    }

    #[test]
    fn attribute_and_small_file() {
        let mut stream = MultipartStream::new(BOUNDARY.into(), factory());
        let body = body(&[
            ("name", None, &b"foo"[..]),
            ("data", Some("a.bin"), &b"hello"[..]),
        ]);
        stream.offer_last(&Bytes::from(body)).unwrap();

        match stream.next() {
            Some(HttpData::Attribute { name, value }) => {
                assert_eq!(name, "name");
                assert_eq!(value, "foo");
            }
            other => panic!("expected attribute, got {other:?}"),
        }
        match stream.next() {
            Some(HttpData::Upload(upload)) => {
                assert!(upload.is_completed());
                assert!(upload.is_in_memory());
                assert_eq!(upload.filename(), "a.bin");
                assert_eq!(&upload.bytes().unwrap()[..], b"hello");
            }
            other => panic!("expected upload, got {other:?}"),
        }
        assert!(stream.next().is_none());
    }

    #[test]
    fn large_file_spills_to_disk() {
        let mut stream = MultipartStream::new(BOUNDARY.into(), factory());
        let payload = vec![0x42u8; MIN_SIZE + 4096];
        let body = body(&[("data", Some("big.bin"), &payload[..])]);
        stream.offer_last(&Bytes::from(body)).unwrap();

        match stream.next() {
            Some(HttpData::Upload(upload)) => {
                assert!(!upload.is_in_memory());
                assert_eq!(upload.len(), payload.len());
                let path = upload.path().unwrap().to_path_buf();
                assert!(path.exists());
                drop(upload);
                assert!(!path.exists());
            }
            other => panic!("expected upload, got {other:?}"),
        }
    }

    #[test]
    fn fragmented_delivery() {
        let mut stream = MultipartStream::new(BOUNDARY.into(), factory());
        let body = body(&[("a", None, &b"1"[..]), ("b", None, &b"2"[..])]);
        let (head, tail) = body.split_at(body.len() / 2);
        stream.offer(&Bytes::copy_from_slice(head)).unwrap();
        stream.offer_last(&Bytes::copy_from_slice(tail)).unwrap();

        let mut names = Vec::new();
        while let Some(data) = stream.next() {
            match data {
                HttpData::Attribute { name, .. } => names.push(name),
                other => panic!("expected attribute, got {other:?}"),
            }
        }
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn truncated_stream_is_hard_error() {
        let mut stream = MultipartStream::new(BOUNDARY.into(), factory());
        let body = body(&[("data", Some("a.bin"), &b"hello"[..])]);
        // cut before the closing boundary
        let cut = &body[..body.len() - 10];
        stream.offer(&Bytes::copy_from_slice(cut)).unwrap();
        let err = stream.offer_last(&Bytes::new()).unwrap_err();
        assert!(err.is_internal());
    }
}
