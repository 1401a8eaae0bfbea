use crate::error::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response};
use std::cmp::Ordering;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use unicode_normalization::UnicodeNormalization;

/// reqwest client shared by a host backend, optionally throttled to a
/// fixed number of requests per minute.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl HttpClient {
    pub fn new(timeout: Duration, requests_per_minute: Option<u32>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("MangaUp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let limiter = requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));

        Ok(Self { client, limiter })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request once the rate limiter allows it.
    pub async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, reqwest::Error> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        request.send().await
    }
}

/// Canonical form of a chapter title used as its identity: NFKC, trimmed,
/// inner whitespace collapsed, lowercased.
pub fn normalize_title(title: &str) -> String {
    let composed: String = title.nfkc().collect();
    composed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Number(&'a str),
    Text(String),
}

fn chunks(text: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = None;

    for (index, ch) in text.char_indices() {
        let is_digit = ch.is_ascii_digit();
        match in_digits {
            Some(current) if current != is_digit => {
                out.push(make_chunk(&text[start..index], current));
                start = index;
                in_digits = Some(is_digit);
            }
            None => in_digits = Some(is_digit),
            _ => {}
        }
    }
    if let Some(current) = in_digits {
        out.push(make_chunk(&text[start..], current));
    }
    out
}

fn make_chunk(slice: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Number(slice.trim_start_matches('0'))
    } else {
        Chunk::Text(slice.to_lowercase())
    }
}

/// Numeric-aware ordering: "Ch. 2" sorts before "Ch. 10".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = chunks(a);
    let right = chunks(b);

    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            (Chunk::Number(x), Chunk::Number(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
            (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}
