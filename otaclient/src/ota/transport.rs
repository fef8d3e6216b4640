// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, io::Read, time::Duration};

use native_tls::Certificate;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[source] Box<attohttpc::Error>),
    #[error("Failed to load trusted root certificate")]
    RootCert(#[source] native_tls::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
}

impl From<attohttpc::Error> for Error {
    fn from(e: attohttpc::Error) -> Self {
        Self::Http(Box::new(e))
    }
}

type Result<T> = std::result::Result<T, Error>;

/// A response whose body has not been read yet.
pub struct Response<'a> {
    pub status: u16,
    /// Value of the `Content-Length` header, if the server sent a valid one.
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + 'a>,
}

impl Response<'_> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// The only way the pipeline talks to the network. The secure channel itself
/// is the implementation's problem.
pub trait Transport {
    fn get(&self, url: &str) -> Result<Response<'_>>;

    /// POST a JSON document and return the response status code.
    fn post_json(&self, url: &str, body: &[u8]) -> Result<u16>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<Response<'_>> {
        (**self).get(url)
    }

    fn post_json(&self, url: &str, body: &[u8]) -> Result<u16> {
        (**self).post_json(url, body)
    }
}

#[derive(Clone, Debug)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// PEM-encoded root certificate to trust in addition to the system roots.
    pub root_cert: Option<Vec<u8>>,
    /// Disable TLS certificate and hostname validation.
    pub insecure: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            root_cert: None,
            insecure: false,
        }
    }
}

/// [`Transport`] backed by attohttpc's blocking client.
pub struct HttpTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
    root_cert: Option<Certificate>,
    insecure: bool,
}

impl HttpTransport {
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let root_cert = options
            .root_cert
            .as_deref()
            .map(Certificate::from_pem)
            .transpose()
            .map_err(Error::RootCert)?;

        if options.insecure {
            warn!("TLS certificate validation is disabled");
        }

        Ok(Self {
            connect_timeout: options.connect_timeout,
            read_timeout: options.read_timeout,
            root_cert,
            insecure: options.insecure,
        })
    }

    fn configure<B>(&self, mut builder: attohttpc::RequestBuilder<B>) -> attohttpc::RequestBuilder<B> {
        builder = builder
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout);

        if let Some(cert) = &self.root_cert {
            builder = builder.add_root_certificate(cert.clone());
        }

        if self.insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        builder
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Response<'_>> {
        let response = self.configure(attohttpc::get(url)).send()?;

        let status = response.status().as_u16();
        let content_length = response
            .headers()
            .get("Content-Length")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.parse().ok());

        Ok(Response {
            status,
            content_length,
            body: Box::new(response),
        })
    }

    fn post_json(&self, url: &str, body: &[u8]) -> Result<u16> {
        let response = self
            .configure(attohttpc::post(url))
            .header("Content-Type", "application/json")
            .bytes(body)
            .send()?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        cell::RefCell,
        collections::HashMap,
        io::{self, Cursor, Read},
    };

    use super::{Error, Response, Result, Transport};

    #[derive(Clone)]
    pub(crate) enum Route {
        Status(u16),
        Body {
            status: u16,
            content_length: Option<u64>,
            data: Vec<u8>,
        },
        /// Send `data` and then fail the read.
        BrokenBody { content_length: u64, data: Vec<u8> },
        Unreachable,
    }

    /// Serves canned GET responses and records POST bodies.
    pub(crate) struct MockTransport {
        pub routes: HashMap<String, Route>,
        pub post_status: u16,
        pub posts: RefCell<Vec<(String, serde_json::Value)>>,
        pub gets: RefCell<Vec<String>>,
        /// Maximum number of bytes returned per read call.
        pub max_read: usize,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self {
                routes: HashMap::new(),
                post_status: 200,
                posts: RefCell::new(Vec::new()),
                gets: RefCell::new(Vec::new()),
                max_read: usize::MAX,
            }
        }

        pub(crate) fn route(mut self, url: &str, route: Route) -> Self {
            self.routes.insert(url.to_owned(), route);
            self
        }

        pub(crate) fn binary(self, url: &str, data: &[u8]) -> Self {
            self.route(
                url,
                Route::Body {
                    status: 200,
                    content_length: Some(data.len() as u64),
                    data: data.to_vec(),
                },
            )
        }
    }

    struct SlowReader<R> {
        inner: R,
        max_read: usize,
        fail_at_eof: bool,
    }

    impl<R: Read> Read for SlowReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.max_read);
            let n = self.inner.read(&mut buf[..n])?;
            if n == 0 && self.fail_at_eof {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            Ok(n)
        }
    }

    impl Transport for MockTransport {
        fn get(&self, url: &str) -> Result<Response<'_>> {
            self.gets.borrow_mut().push(url.to_owned());

            let (status, content_length, data, fail_at_eof) = match self.routes.get(url) {
                None => (404, None, Vec::new(), false),
                Some(Route::Status(s)) => (*s, None, Vec::new(), false),
                Some(Route::Body {
                    status,
                    content_length,
                    data,
                }) => (*status, *content_length, data.clone(), false),
                Some(Route::BrokenBody {
                    content_length,
                    data,
                }) => (200, Some(*content_length), data.clone(), true),
                Some(Route::Unreachable) => {
                    return Err(Error::Connection(format!("{url}: unreachable")));
                }
            };

            Ok(Response {
                status,
                content_length,
                body: Box::new(SlowReader {
                    inner: Cursor::new(data),
                    max_read: self.max_read,
                    fail_at_eof,
                }),
            })
        }

        fn post_json(&self, url: &str, body: &[u8]) -> Result<u16> {
            let value = serde_json::from_slice(body)
                .map_err(|e| Error::Connection(format!("bad JSON body: {e}")))?;
            self.posts.borrow_mut().push((url.to_owned(), value));

            Ok(self.post_status)
        }
    }
}
