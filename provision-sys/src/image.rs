// SPDX-License-Identifier: GPL-3.0-only

//! Image streaming, checksums and packing
//!
//! Images are streamed from `file://` or `http(s)://` locations straight
//! onto the target block device. Interrupted HTTP transfers are resumed with
//! a `Range` request from the last byte written.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use provision_contracts::{
    CommandExecutor, CommandSpec, ImageOps, ProvisionError, Result, Sleeper,
};
use provision_types::{Container, SchemeError};
use reqwest::blocking::{Client, Response};
use reqwest::header::RANGE;

use crate::error::SysError;

const COPY_BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_retries: 30,
            request_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl HttpSettings {
    /// Whether retry number `retry` may run. `max_retries == 0` retries
    /// forever; otherwise the first attempt plus `max_retries` retries.
    pub fn allows_retry(&self, retry: u32) -> bool {
        self.max_retries == 0 || retry <= self.max_retries
    }
}

/// Run `attempt` until it succeeds or the retry budget is spent.
fn with_http_retries<T, E: std::fmt::Display>(
    http: &HttpSettings,
    sleeper: &dyn Sleeper,
    url: &str,
    mut attempt: impl FnMut() -> std::result::Result<T, E>,
) -> std::result::Result<T, SysError> {
    let mut retry = 0;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(error) => {
                tracing::debug!("Request to {} failed on attempt {}: {}", url, retry + 1, error);
                retry += 1;
                if !http.allows_retry(retry) {
                    return Err(SysError::Http {
                        url: url.to_string(),
                        reason: error.to_string(),
                    });
                }
                sleeper.sleep(http.retry_delay);
            }
        }
    }
}

pub struct ImageTools {
    executor: Arc<dyn CommandExecutor>,
    sleeper: Arc<dyn Sleeper>,
    http: HttpSettings,
    read_chunk_size: usize,
}

enum Location<'a> {
    File(&'a str),
    Http(&'a str),
}

fn parse_location(uri: &str) -> Result<Location<'_>> {
    if let Some(path) = uri.strip_prefix("file://") {
        Ok(Location::File(path))
    } else if uri.starts_with("http://") || uri.starts_with("https://") {
        Ok(Location::Http(uri))
    } else {
        Err(SchemeError::WrongInputData(format!("unsupported image location {uri}")).into())
    }
}

/// Response body that reconnects from the current offset on read errors.
/// Reconnects are counted over the whole transfer.
struct ResumableBody<'a, R, F> {
    http: &'a HttpSettings,
    sleeper: &'a dyn Sleeper,
    url: &'a str,
    offset: u64,
    reconnects: u32,
    response: Option<R>,
    open: F,
}

impl<'a, R, F> ResumableBody<'a, R, F>
where
    R: Read,
    F: FnMut(u64) -> io::Result<R>,
{
    fn new(http: &'a HttpSettings, sleeper: &'a dyn Sleeper, url: &'a str, open: F) -> Self {
        Self {
            http,
            sleeper,
            url,
            offset: 0,
            reconnects: 0,
            response: None,
            open,
        }
    }
}

impl<R, F> Read for ResumableBody<'_, R, F>
where
    R: Read,
    F: FnMut(u64) -> io::Result<R>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut response = match self.response.take() {
                Some(response) => response,
                None => (self.open)(self.offset)?,
            };
            match response.read(buf) {
                Ok(read) => {
                    self.offset += read as u64;
                    self.response = Some(response);
                    return Ok(read);
                }
                Err(error) if self.http.allows_retry(self.reconnects + 1) => {
                    self.reconnects += 1;
                    tracing::warn!(
                        "Reading {} failed at byte {}: {}. Reconnecting ({})",
                        self.url,
                        self.offset,
                        error,
                        self.reconnects
                    );
                    self.sleeper.sleep(self.http.retry_delay);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Copy everything from `source` into `dest` through a fixed buffer.
fn copy_stream(source: &mut dyn Read, dest: &mut File) -> io::Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total_copied: u64 = 0;

    loop {
        let bytes_read = source.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }

        dest.write_all(&buffer[..bytes_read])?;
        total_copied += bytes_read as u64;
    }

    dest.sync_all()?;
    Ok(total_copied)
}

/// md5 over at most `size` bytes, reading `chunk_size` bytes at a time.
fn md5_prefix(source: &mut dyn Read, size: u64, chunk_size: usize) -> io::Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut processed: u64 = 0;

    while processed < size {
        let read = source.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        let take = (size - processed).min(read as u64) as usize;
        context.consume(&buffer[..take]);
        processed += take as u64;
    }

    Ok(format!("{:x}", context.compute()))
}

impl ImageTools {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        sleeper: Arc<dyn Sleeper>,
        http: HttpSettings,
        read_chunk_size: usize,
    ) -> Self {
        Self {
            executor,
            sleeper,
            http,
            read_chunk_size,
        }
    }

    fn client(&self) -> std::result::Result<Client, SysError> {
        Client::builder()
            .timeout(self.http.request_timeout)
            .build()
            .map_err(|error| SysError::Http {
                url: String::new(),
                reason: error.to_string(),
            })
    }

    /// GET `url` starting at `offset`, retrying connection failures.
    fn open_http(&self, url: &str, offset: u64) -> std::result::Result<Response, SysError> {
        let client = self.client()?;
        let response = with_http_retries(&self.http, self.sleeper.as_ref(), url, || {
            client
                .get(url)
                .header(RANGE, format!("bytes={offset}-"))
                .send()
                .and_then(Response::error_for_status)
        })?;
        if offset > 0 && response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(SysError::Http {
                url: url.to_string(),
                reason: format!("server ignored range request at byte {offset}"),
            });
        }
        Ok(response)
    }

    fn open_source<'a>(&'a self, uri: &'a str) -> Result<Box<dyn Read + 'a>> {
        match parse_location(uri)? {
            Location::File(path) => {
                let file = File::open(path).map_err(|error| ProvisionError::io(path, error))?;
                Ok(Box::new(file))
            }
            Location::Http(url) => Ok(Box::new(ResumableBody::new(
                &self.http,
                self.sleeper.as_ref(),
                url,
                move |offset| self.open_http(url, offset).map_err(io::Error::other),
            ))),
        }
    }
}

impl ImageOps for ImageTools {
    fn copy_image(&self, uri: &str, container: Container, target: &str) -> Result<u64> {
        let source = self.open_source(uri)?;
        let mut reader: Box<dyn Read + '_> = match container {
            Container::Raw => source,
            Container::Gzip => Box::new(GzDecoder::new(source)),
        };
        let mut dest = OpenOptions::new()
            .write(true)
            .open(target)
            .map_err(|error| SysError::from_open(target, error))?;

        tracing::debug!("Copying {} ({}) to {}", uri, container, target);
        let written = copy_stream(reader.as_mut(), &mut dest)
            .map_err(|error| ProvisionError::io(target, error))?;
        tracing::debug!("Wrote {} bytes to {}", written, target);
        Ok(written)
    }

    fn calculate_md5(&self, path: &str, size: u64) -> Result<String> {
        let mut file = File::open(path).map_err(|error| SysError::from_open(path, error))?;
        md5_prefix(&mut file, size, self.read_chunk_size)
            .map_err(|error| ProvisionError::io(path, error))
    }

    fn fetch_text(&self, uri: &str) -> Result<String> {
        match parse_location(uri)? {
            Location::File(path) => {
                std::fs::read_to_string(path).map_err(|error| ProvisionError::io(path, error))
            }
            Location::Http(url) => {
                let response = self.open_http(url, 0)?;
                response.text().map_err(|error| {
                    SysError::Http {
                        url: url.to_string(),
                        reason: error.to_string(),
                    }
                    .into()
                })
            }
        }
    }

    fn sync_tree(&self, src: &Path, dst: &Path) -> Result<()> {
        let src = format!("{}/", src.display().to_string().trim_end_matches('/'));
        crate::exec::capture(
            self.executor.as_ref(),
            &CommandSpec::new("rsync")
                .args(["-avH", &src])
                .arg(dst.display().to_string()),
        )?;
        Ok(())
    }

    fn containerize(&self, src: &Path, container: Container, dst: &Path) -> Result<()> {
        match container {
            Container::Raw => {
                std::fs::rename(src, dst).map_err(|error| ProvisionError::io(dst, error))
            }
            Container::Gzip => {
                let mut input = File::open(src).map_err(|error| ProvisionError::io(src, error))?;
                let output = File::create(dst).map_err(|error| ProvisionError::io(dst, error))?;
                let mut encoder = GzEncoder::new(output, Compression::default());
                let mut buffer = vec![0u8; self.read_chunk_size.max(1)];
                loop {
                    let read = input
                        .read(&mut buffer)
                        .map_err(|error| ProvisionError::io(src, error))?;
                    if read == 0 {
                        break;
                    }
                    encoder
                        .write_all(&buffer[..read])
                        .map_err(|error| ProvisionError::io(dst, error))?;
                }
                encoder
                    .finish()
                    .map_err(|error| ProvisionError::io(dst, error))?;
                std::fs::remove_file(src).map_err(|error| ProvisionError::io(src, error))
            }
        }
    }
}
