// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::VecDeque,
    io::{self, Read},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::ota::{
    DownloadedPayload, Error, Result,
    transport::{Response, Transport},
};

/// Default number of bytes requested from the connection per read.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default upper bound on the declared length of an image.
pub const DEFAULT_MAX_SIZE: u64 = 64 * 1024 * 1024;

pub trait ProgressDisplay {
    fn progress(&mut self, current: u64, total: u64);

    fn finish(&mut self);
}

pub struct BasicProgressDisplay {
    interval: Duration,
    last_render: Instant,
    avg: VecDeque<(Instant, u64)>,
}

// Speed is a simple moving average over 5 seconds.
static AVG_INTERVAL: Duration = Duration::from_millis(100);
static AVG_WINDOW_SIZE: usize = 5000 / AVG_INTERVAL.as_millis() as usize;

impl BasicProgressDisplay {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_render: Instant::now() - interval,
            avg: VecDeque::new(),
        }
    }

    fn clear_line(&self) {
        eprint!("\x1b[2K\r");
    }

    fn speed_kib_s(&self) -> f64 {
        let (Some(front), Some(back)) = (self.avg.front(), self.avg.back()) else {
            return 0.0;
        };

        let window_kib = (back.1 - front.1) as f64 / 1024.0;
        let window_duration = back.0 - front.0;

        if window_duration.is_zero() {
            0.0
        } else {
            window_kib / window_duration.as_secs_f64()
        }
    }
}

impl ProgressDisplay for BasicProgressDisplay {
    fn progress(&mut self, current: u64, total: u64) {
        let now = Instant::now();

        if self
            .avg
            .back()
            .is_none_or(|(last, _)| now - *last > AVG_INTERVAL)
        {
            if self.avg.len() == AVG_WINDOW_SIZE {
                self.avg.pop_front();
            }

            self.avg.push_back((now, current));
        }

        if now - self.last_render > self.interval || current == total {
            let current_kib = current as f64 / 1024.0;
            let total_kib = total as f64 / 1024.0;
            let speed = self.speed_kib_s();

            self.clear_line();
            eprint!("{current_kib:.1} / {total_kib:.1} KiB ({speed:.1} KiB/s)");

            self.last_render = now;
        }
    }

    fn finish(&mut self) {
        self.clear_line();
    }
}

/// Streams a firmware image into memory.
pub struct FirmwareFetcher<'a, T: Transport> {
    transport: &'a T,
    chunk_size: usize,
    max_size: u64,
}

impl<'a, T: Transport> FirmwareFetcher<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Download `url`. The buffer is sized by the server's declared length and
    /// the total number of received bytes is checked against `expected_size`
    /// only once the transfer ends. On any error, the partial buffer is
    /// dropped before returning.
    pub fn fetch(
        &self,
        url: &str,
        expected_size: u64,
        mut display: Option<&mut dyn ProgressDisplay>,
    ) -> Result<DownloadedPayload> {
        debug!("Downloading firmware: {url}");

        let response = self.transport.get(url).map_err(Error::DownloadRequest)?;
        if !response.is_success() {
            return Err(Error::DownloadStatus(response.status));
        }

        let declared = self.declared_len(&response)?;

        let result = read_chunks(response.body, declared, self.chunk_size, &mut display);

        if let Some(d) = display {
            d.finish();
        }

        let data = result?;
        let actual = data.len() as u64;

        if actual != expected_size {
            return Err(Error::DownloadSizeMismatch {
                expected: expected_size,
                actual,
            });
        }

        debug!("Downloaded {actual} bytes");

        Ok(DownloadedPayload::new(data))
    }

    fn declared_len(&self, response: &Response<'_>) -> Result<usize> {
        let length = match response.content_length {
            Some(n) if n > 0 => n,
            n => return Err(Error::DownloadInvalidLength(n)),
        };

        if length > self.max_size {
            return Err(Error::DownloadTooLarge {
                declared: length,
                limit: self.max_size,
            });
        }

        usize::try_from(length).map_err(|_| Error::DownloadInvalidLength(Some(length)))
    }
}

/// Read from `reader` in chunks of at most `chunk_size` bytes until it reaches
/// EOF or `declared` bytes were received. The returned buffer may be shorter
/// than `declared` if the connection closed early.
fn read_chunks(
    mut reader: impl Read,
    declared: usize,
    chunk_size: usize,
    display: &mut Option<&mut dyn ProgressDisplay>,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; declared];
    let mut total = 0;

    while total < declared {
        let end = total.saturating_add(chunk_size).min(declared);

        let n = match reader.read(&mut buf[total..end]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::DownloadRead {
                    received: total as u64,
                    source: e,
                });
            }
        };

        total += n;

        if let Some(d) = display.as_deref_mut() {
            d.progress(total as u64, declared as u64);
        }
    }

    buf.truncate(total);

    Ok(buf)
}
