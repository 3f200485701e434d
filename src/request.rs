use std::fmt;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::{ReboundError, Result};

/// Upper bound on the buffer reserved up front for one attempt's payload.
const PAYLOAD_PREALLOCATE_LIMIT: u64 = 64 * 1024;

trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Seekable request payload that can be replayed on every attempt.
pub struct ReplayableBody {
    reader: Box<dyn ReadSeek>,
    start: u64,
    len: Option<u64>,
}

impl ReplayableBody {
    /// Wraps a seekable reader.
    ///
    /// The current position becomes the replay start. The remaining length
    /// is inferred by seeking to the end when the reader supports it.
    pub fn new<R>(mut reader: R) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let start = reader
            .stream_position()
            .map_err(|err| ReboundError::Construction(format!("unreadable body: {err}")))?;
        let len = reader
            .seek(SeekFrom::End(0))
            .ok()
            .map(|end| end.saturating_sub(start));
        reader
            .seek(SeekFrom::Start(start))
            .map_err(|err| ReboundError::Construction(format!("unseekable body: {err}")))?;

        Ok(Self {
            reader: Box::new(reader),
            start,
            len,
        })
    }

    fn in_memory(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            reader: Box::new(Cursor::new(bytes)),
            start: 0,
            len: Some(len),
        }
    }

    /// Number of bytes sent per attempt, when known.
    pub fn len(&self) -> Option<u64> {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }

    /// Seeks back to the offset observed at construction.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(self.start))
            .map(|_| ())
            .map_err(ReboundError::BodyRewind)
    }

    fn read_payload(&mut self) -> Result<Vec<u8>> {
        let reserve = self.len.map_or(0, |len| len.min(PAYLOAD_PREALLOCATE_LIMIT));
        let mut payload = Vec::with_capacity(usize::try_from(reserve).unwrap_or(0));
        let read = match self.len {
            Some(len) => (&mut self.reader).take(len).read_to_end(&mut payload),
            None => self.reader.read_to_end(&mut payload),
        };
        read.map_err(ReboundError::BodyRewind)?;
        Ok(payload)
    }
}

impl fmt::Debug for ReplayableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayableBody")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

impl From<Vec<u8>> for ReplayableBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::in_memory(bytes)
    }
}

impl From<String> for ReplayableBody {
    fn from(text: String) -> Self {
        Self::in_memory(text.into_bytes())
    }
}

impl From<&'static str> for ReplayableBody {
    fn from(text: &'static str) -> Self {
        Self::in_memory(text.as_bytes().to_vec())
    }
}

impl From<&'static [u8]> for ReplayableBody {
    fn from(bytes: &'static [u8]) -> Self {
        Self::in_memory(bytes.to_vec())
    }
}

/// HTTP request whose body can be rewound between attempts.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<ReplayableBody>,
}

impl Request {
    /// Validates `method` and `url` and attaches an optional body.
    pub fn new(method: &str, url: &str, body: Option<ReplayableBody>) -> Result<Self> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ReboundError::Construction(format!("invalid method '{method}'")))?;
        let url = Url::parse(url)
            .map_err(|err| ReboundError::Construction(format!("invalid url '{url}': {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ReboundError::Construction(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }

        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body,
        })
    }

    /// Adds a header, replacing any previous value with the same name.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.insert_header(name, value)?;
        Ok(self)
    }

    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ReboundError::Construction(format!("invalid header name: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ReboundError::Construction(format!("invalid header value: {err}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&ReplayableBody> {
        self.body.as_ref()
    }

    /// Length announced as `Content-Length`; `None` without a body or when
    /// the body length is unknown.
    pub fn content_length(&self) -> Option<u64> {
        self.body.as_ref().and_then(ReplayableBody::len)
    }

    pub(crate) fn rewind(&mut self) -> Result<()> {
        match self.body.as_mut() {
            Some(body) => body.rewind(),
            None => Ok(()),
        }
    }

    /// Builds the transport request for one attempt, consuming the body
    /// from its current position.
    pub(crate) fn build_attempt(
        &mut self,
        http: &reqwest::Client,
        timeout: Duration,
    ) -> Result<reqwest::RequestBuilder> {
        let builder = http
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .timeout(timeout);

        match self.body.as_mut() {
            Some(body) => Ok(builder.body(body.read_payload()?)),
            None => Ok(builder),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Seek, SeekFrom};

    use super::{ReplayableBody, Request, PAYLOAD_PREALLOCATE_LIMIT};
    use crate::ReboundError;

    struct Unseekable;

    impl Read for Unseekable {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Seek for Unseekable {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Err(io::Error::other("not seekable"))
        }
    }

    /// Claims a huge length while holding only a few bytes.
    struct Overstated {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for Overstated {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for Overstated {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            match pos {
                SeekFrom::End(_) => Ok(u64::MAX / 2),
                other => self.inner.seek(other),
            }
        }
    }

    #[test]
    fn overstated_length_does_not_reserve_it_up_front() {
        let mut body = ReplayableBody::new(Overstated {
            inner: Cursor::new(b"abc".to_vec()),
        })
        .expect("must wrap reader");
        assert_eq!(body.len(), Some(u64::MAX / 2));

        let payload = body.read_payload().expect("must read");
        assert_eq!(payload, b"abc");
        assert!(payload.capacity() as u64 <= PAYLOAD_PREALLOCATE_LIMIT);
    }

    #[test]
    fn known_length_becomes_content_length() {
        let request = Request::new(
            "POST",
            "http://localhost/items",
            Some(r#"{"foo":"bar"}"#.into()),
        )
        .expect("must build request");
        assert_eq!(request.content_length(), Some(13));
    }

    #[test]
    fn length_is_measured_from_current_position() {
        let mut cursor = Cursor::new(b"skip-payload".to_vec());
        cursor.seek(SeekFrom::Start(5)).expect("must seek");
        let mut body = ReplayableBody::new(cursor).expect("must wrap reader");
        assert_eq!(body.len(), Some(7));

        assert_eq!(body.read_payload().expect("must read"), b"payload");
        body.rewind().expect("must rewind");
        assert_eq!(body.read_payload().expect("must read"), b"payload");
    }

    #[test]
    fn request_without_body_has_no_length() {
        let request = Request::new("GET", "https://localhost/", None).expect("must build");
        assert_eq!(request.content_length(), None);
        assert!(request.body().is_none());
    }

    #[test]
    fn unseekable_reader_is_construction_error() {
        let err = ReplayableBody::new(Unseekable).expect_err("must reject reader");
        assert!(matches!(err, ReboundError::Construction(_)));
    }

    #[test]
    fn malformed_method_and_url_are_rejected() {
        assert!(matches!(
            Request::new("GE T", "http://localhost/", None),
            Err(ReboundError::Construction(_))
        ));
        assert!(matches!(
            Request::new("GET", "not a url", None),
            Err(ReboundError::Construction(_))
        ));
        assert!(matches!(
            Request::new("GET", "ftp://localhost/file", None),
            Err(ReboundError::Construction(_))
        ));
    }

    #[test]
    fn invalid_header_is_construction_error() {
        let request = Request::new("GET", "http://localhost/", None).expect("must build");
        let err = request
            .with_header("bad header", "value")
            .expect_err("must reject header");
        assert!(matches!(err, ReboundError::Construction(_)));
    }
}
