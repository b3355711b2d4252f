//! Streaming compression for request payloads.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use async_compression::{tokio::write::GzipEncoder, Level};
use http::HeaderValue;
use pin_project::pin_project;
use tokio::io::AsyncWrite;

static CONTENT_ENCODING_GZIP: HeaderValue = HeaderValue::from_static("gzip");

/// Compression schemes supported by `Compressor`.
#[derive(Copy, Clone, Debug)]
pub enum CompressionScheme {
    /// Gzip.
    Gzip(Level),
}

impl CompressionScheme {
    /// Gzip compression, using the default compression level.
    pub const fn gzip_default() -> Self {
        Self::Gzip(Level::Default)
    }
}

/// Generic compressor.
///
/// Wraps a writer with the compression stream selected by [`CompressionScheme`], so callers can write into it without
/// caring which scheme is in use. Callers must shut down the compressor (`AsyncWriteExt::shutdown`) before calling
/// [`into_inner`][Self::into_inner], or trailing compressed data will be missing.
#[pin_project(project = CompressorProjected)]
pub enum Compressor<W: AsyncWrite> {
    /// Gzip compressor.
    Gzip(#[pin] GzipEncoder<W>),
}

impl<W: AsyncWrite> Compressor<W> {
    /// Creates a new compressor from a given compression scheme and writer.
    pub fn from_scheme(scheme: CompressionScheme, writer: W) -> Self {
        match scheme {
            CompressionScheme::Gzip(level) => Self::Gzip(GzipEncoder::with_quality(writer, level)),
        }
    }

    /// Consumes the compressor, returning the inner writer.
    pub fn into_inner(self) -> W {
        match self {
            Self::Gzip(encoder) => encoder.into_inner(),
        }
    }

    /// Returns the content encoding for this compressor.
    pub fn content_encoding(&self) -> HeaderValue {
        match self {
            Self::Gzip(_) => CONTENT_ENCODING_GZIP.clone(),
        }
    }
}

impl<W: AsyncWrite> AsyncWrite for Compressor<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
        match self.project() {
            CompressorProjected::Gzip(encoder) => encoder.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.project() {
            CompressorProjected::Gzip(encoder) => encoder.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.project() {
            CompressorProjected::Gzip(encoder) => encoder.poll_shutdown(cx),
        }
    }
}
