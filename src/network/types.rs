//! Request and response types flowing through the fetch policy.

use reqwest::Method;
use url::Url;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Full page load
  Navigate,
  /// Subresource load; cross-origin results are opaque
  NoCors,
}

/// What kind of resource the request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Destination {
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
  /// Anything else (fetch/XHR, data files)
  Empty,
}

impl Destination {
  /// Guess the destination from the file extension of a URL path.
  pub fn from_path(path: &str) -> Self {
    let file = path.rsplit('/').next().unwrap_or_default();
    let extension = match file.rsplit_once('.') {
      Some((_, ext)) => ext.to_ascii_lowercase(),
      None => return Self::Empty,
    };

    match extension.as_str() {
      "png" | "jpg" | "jpeg" | "gif" | "svg" | "ico" | "webp" | "avif" => Self::Image,
      "js" | "mjs" => Self::Script,
      "css" => Self::Style,
      "woff" | "woff2" | "ttf" | "otf" => Self::Font,
      "webmanifest" => Self::Manifest,
      "html" | "htm" => Self::Document,
      _ => Self::Empty,
    }
  }
}

/// An outgoing request seen by the manager.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl Request {
  /// A subresource GET, destination guessed from the path.
  pub fn get(url: Url) -> Self {
    let destination = Destination::from_path(url.path());
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::NoCors,
      destination,
    }
  }

  /// A full page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::Navigate,
      destination: Destination::Document,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Classification of a response relative to the page origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response obtained with CORS
  Cors,
  /// Cross-origin response whose contents are hidden from the page
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// A response, either fresh from the network or read back from a cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL after redirects
  pub url: Url,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
}

impl Response {
  /// Only complete same-origin responses are worth keeping.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.response_type == ResponseType::Basic
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
