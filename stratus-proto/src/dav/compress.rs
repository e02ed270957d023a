//! Content codings of message bodies.
//!
//! Responses may be compressed with gzip or deflate, request bodies of PUT
//! may arrive compressed with either. `br` is understood during
//! negotiation but never produced.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};

use stratus_store::{ByteStream, DavError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    Identity,
    Gzip,
    Deflate,
    Br,
}

impl Coding {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "identity" => Some(Self::Identity),
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "br" => Some(Self::Br),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Br => "br",
        }
    }
}

/// Codings we are able to produce
pub const SUPPORTED: [Coding; 2] = [Coding::Gzip, Coding::Deflate];

/// Choose a response coding among `available` from an `Accept-Encoding`
/// header. Ties go to compression. Fails with `NotAcceptable` when
/// identity is refused and nothing else fits.
pub fn negotiate(accept: Option<&str>, available: &[Coding]) -> Result<Coding> {
    let accept = match accept {
        Some(a) => a,
        None => return Ok(Coding::Identity),
    };

    let mut star = None;
    let mut weights: Vec<(Coding, f32)> = vec![];
    for entry in accept.split(',') {
        let mut fields = entry.split(';');
        let name = fields.next().unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }
        let q = fields
            .filter_map(|f| f.trim().strip_prefix("q="))
            .next()
            .and_then(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        match name {
            "*" => star = Some(q),
            n => {
                if let Some(c) = Coding::parse(n) {
                    weights.push((c, q));
                }
            }
        }
    }
    let weight_of = |c: Coding| {
        weights
            .iter()
            .find(|(w, _)| *w == c)
            .map(|(_, q)| *q)
    };

    let mut best: Option<(Coding, f32)> = None;
    for c in available {
        if let Some(q) = weight_of(*c).or(star) {
            if q > 0.0 && best.map_or(true, |(_, b)| q > b) {
                best = Some((*c, q));
            }
        }
    }
    let identity = weight_of(Coding::Identity).or(star).unwrap_or(1.0);

    match best {
        Some((c, q)) if q >= identity => Ok(c),
        _ if identity > 0.0 => Ok(Coding::Identity),
        _ => Err(DavError::NotAcceptable),
    }
}

/// Media types not worth compressing again
pub fn is_compressed(media_type: &str) -> bool {
    let mt = media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    (mt.starts_with("image/") && mt != "image/svg+xml")
        || mt.starts_with("video/")
        || mt.starts_with("audio/")
        || matches!(
            mt.as_str(),
            "application/zip"
                | "application/gzip"
                | "application/x-gzip"
                | "application/x-bzip2"
                | "application/x-xz"
                | "application/x-7z-compressed"
                | "application/x-rar-compressed"
                | "application/zstd"
                | "application/pdf"
        )
}

enum Transform {
    GzipEncode(GzEncoder<Vec<u8>>),
    DeflateEncode(ZlibEncoder<Vec<u8>>),
    GzipDecode(GzDecoder<Vec<u8>>),
    DeflateDecode(ZlibDecoder<Vec<u8>>),
}

impl Transform {
    fn write(&mut self, data: &[u8]) -> io::Result<Bytes> {
        let out = match self {
            Self::GzipEncode(w) => {
                w.write_all(data)?;
                w.get_mut()
            }
            Self::DeflateEncode(w) => {
                w.write_all(data)?;
                w.get_mut()
            }
            Self::GzipDecode(w) => {
                w.write_all(data)?;
                w.get_mut()
            }
            Self::DeflateDecode(w) => {
                w.write_all(data)?;
                w.get_mut()
            }
        };
        Ok(Bytes::from(std::mem::take(out)))
    }

    fn finish(self) -> io::Result<Bytes> {
        let out = match self {
            Self::GzipEncode(w) => w.finish()?,
            Self::DeflateEncode(w) => w.finish()?,
            Self::GzipDecode(w) => w.finish()?,
            Self::DeflateDecode(w) => w.finish()?,
        };
        Ok(Bytes::from(out))
    }

    fn apply(self, input: ByteStream) -> ByteStream {
        stream::unfold((input, Some(self)), |(mut input, codec)| async move {
            let mut codec = codec?;
            let out = match input.next().await {
                Some(Ok(chunk)) => match codec.write(&chunk) {
                    Ok(b) => return Some((Ok(b), (input, Some(codec)))),
                    Err(e) => Err(e),
                },
                Some(Err(e)) => Err(e),
                None => codec.finish(),
            };
            Some((out, (input, None)))
        })
        .try_filter(|b| future::ready(!b.is_empty()))
        .boxed()
    }
}

/// Compress a response body
pub fn encode(input: ByteStream, coding: Coding) -> ByteStream {
    match coding {
        Coding::Gzip => Transform::GzipEncode(GzEncoder::new(vec![], Compression::default())).apply(input),
        Coding::Deflate => Transform::DeflateEncode(ZlibEncoder::new(vec![], Compression::default())).apply(input),
        Coding::Identity | Coding::Br => input,
    }
}

/// Decompress a request body according to its `Content-Encoding`
pub fn decode(input: ByteStream, content_encoding: Option<&str>) -> Result<ByteStream> {
    let coding = match content_encoding.map(str::trim) {
        None | Some("") => Coding::Identity,
        Some(v) => Coding::parse(v).ok_or(DavError::MediaTypeNotSupported)?,
    };
    match coding {
        Coding::Identity => Ok(input),
        Coding::Gzip => Ok(Transform::GzipDecode(GzDecoder::new(vec![])).apply(input)),
        Coding::Deflate => Ok(Transform::DeflateDecode(ZlibDecoder::new(vec![])).apply(input)),
        Coding::Br => Err(DavError::MediaTypeNotSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation() {
        let all = &SUPPORTED[..];
        assert_eq!(negotiate(None, all).unwrap(), Coding::Identity);
        assert_eq!(negotiate(Some("gzip, deflate"), all).unwrap(), Coding::Gzip);
        assert_eq!(negotiate(Some("gzip;q=0.5, deflate"), all).unwrap(), Coding::Deflate);
        assert_eq!(negotiate(Some("br"), all).unwrap(), Coding::Identity);
        assert_eq!(negotiate(Some("gzip;q=0.2, identity;q=0.8"), all).unwrap(), Coding::Identity);
        assert_eq!(negotiate(Some("*"), all).unwrap(), Coding::Gzip);
        assert_eq!(negotiate(Some("gzip"), &[]).unwrap(), Coding::Identity);
    }

    #[test]
    fn identity_refused() {
        let all = &SUPPORTED[..];
        assert_eq!(negotiate(Some("identity;q=0, deflate"), all).unwrap(), Coding::Deflate);
        assert!(matches!(
            negotiate(Some("br, *;q=0"), all),
            Err(DavError::NotAcceptable)
        ));
        assert!(matches!(
            negotiate(Some("gzip, identity;q=0"), &[]),
            Err(DavError::NotAcceptable)
        ));
    }

    #[test]
    fn precompressed_media() {
        assert!(is_compressed("image/png"));
        assert!(is_compressed("application/zip"));
        assert!(!is_compressed("image/svg+xml"));
        assert!(!is_compressed("text/plain; charset=utf-8"));
    }

    async fn collect(s: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = s.try_collect().await.unwrap();
        chunks.concat()
    }

    fn chunks(data: &'static [u8]) -> ByteStream {
        stream::iter(data.chunks(7).map(|c| Ok(Bytes::from_static(c)))).boxed()
    }

    #[tokio::test]
    async fn codings_invert_each_other() {
        let data: &'static [u8] = b"the quick brown fox jumps over the lazy dog, again and again";
        for coding in SUPPORTED {
            let packed = collect(encode(chunks(data), coding)).await;
            assert_ne!(packed, data);
            let packed: &'static [u8] = Box::leak(packed.into_boxed_slice());
            let unpacked = collect(decode(chunks(packed), Some(coding.as_str())).unwrap()).await;
            assert_eq!(unpacked, data);
        }
        assert!(matches!(decode(chunks(data), Some("compress")), Err(DavError::MediaTypeNotSupported)));
    }
}
