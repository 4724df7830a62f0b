#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use news_aggregator::fetcher::{HttpTransport, RawResponse, TransportFailure};
use news_aggregator::{
    AggregatorConfig, Clock, FetchErrorKind, Fetcher, HtmlParams, RetryPolicy, SourceConfig,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[derive(Debug, Clone)]
pub enum Reply {
    Body {
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
    },
    Fail(FetchErrorKind),
}

pub fn xml(body: impl Into<String>) -> Reply {
    raw(Some("application/rss+xml; charset=utf-8"), body.into().into_bytes())
}

pub fn html(body: impl Into<String>) -> Reply {
    raw(Some("text/html"), body.into().into_bytes())
}

pub fn json(body: impl Into<String>) -> Reply {
    raw(Some("application/json"), body.into().into_bytes())
}

pub fn raw(content_type: Option<&str>, body: Vec<u8>) -> Reply {
    Reply::Body {
        status: 200,
        content_type: content_type.map(str::to_string),
        body,
    }
}

pub fn status(code: u16) -> Reply {
    Reply::Body {
        status: code,
        content_type: None,
        body: Vec::new(),
    }
}

pub fn fail(kind: FetchErrorKind) -> Reply {
    Reply::Fail(kind)
}

struct Route {
    prefix: String,
    replies: VecDeque<Reply>,
    delay: Duration,
}

/// In-memory transport. Each route answers URLs starting with its prefix
/// (longest prefix wins, later routes win ties) with its replies in order;
/// the last reply repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, prefix: &str, replies: Vec<Reply>) -> Self {
        self.slow_route(prefix, Duration::ZERO, replies)
    }

    /// Like `route`, but every reply arrives after `delay`.
    pub fn slow_route(self, prefix: &str, delay: Duration, replies: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().push(Route {
            prefix: prefix.to_string(),
            replies: replies.into(),
            delay,
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.requested.lock().unwrap().len()
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.requested
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.starts_with(prefix))
            .count()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportFailure> {
        self.requested.lock().unwrap().push(url.to_string());

        let (reply, delay) = {
            let mut routes = self.routes.lock().unwrap();
            match routes
                .iter_mut()
                .filter(|route| url.starts_with(route.prefix.as_str()))
                .max_by_key(|route| route.prefix.len())
            {
                Some(route) => {
                    let reply = if route.replies.len() > 1 {
                        route.replies.pop_front()
                    } else {
                        route.replies.front().cloned()
                    };
                    (reply, route.delay)
                }
                None => (None, Duration::ZERO),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Body {
                status,
                content_type,
                body,
            }) => Ok(RawResponse {
                status,
                content_type,
                final_url: url.to_string(),
                body,
            }),
            Some(Reply::Fail(kind)) => Err(TransportFailure::new(
                kind,
                format!("scripted {} failure", kind),
            )),
            None => Err(TransportFailure::new(
                FetchErrorKind::Connect,
                format!("no route to {}", url),
            )),
        }
    }
}

pub fn fetcher(transport: &Arc<ScriptedTransport>) -> Fetcher {
    Fetcher::with_transport(transport.clone(), RetryPolicy::default())
}

pub fn config(sources: Vec<SourceConfig>) -> AggregatorConfig {
    AggregatorConfig::default().with_sources(sources)
}

pub fn fixed_clock() -> Clock {
    Arc::new(|| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
}

pub const FEED_A: &str = "https://feeds.example.com/a.xml";
pub const PAGE_B: &str = "https://news.example.cn/futures/index.html";

pub fn rss_source(id: &str, endpoint: &str) -> SourceConfig {
    SourceConfig::rss(id, endpoint)
}

pub fn html_source(id: &str, endpoint: &str) -> SourceConfig {
    SourceConfig::html(id, endpoint, HtmlParams::default())
}

/// RSS 2.0 document with one item per `(title, link)`.
pub fn rss_feed(items: &[(&str, &str)]) -> String {
    let dated: Vec<(&str, &str, Option<&str>)> =
        items.iter().map(|(t, l)| (*t, *l, None)).collect();
    rss_document(&dated)
}

/// RSS 2.0 document with one item per `(title, link, pubDate)`.
pub fn rss_feed_dated(items: &[(&str, &str, &str)]) -> String {
    let dated: Vec<(&str, &str, Option<&str>)> =
        items.iter().map(|(t, l, d)| (*t, *l, Some(*d))).collect();
    rss_document(&dated)
}

fn rss_document(items: &[(&str, &str, Option<&str>)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <rss version=\"2.0\"><channel><title>Test feed</title>\
         <link>https://feeds.example.com/</link><description>Test</description>\n",
    );
    for (title, link, published) in items {
        xml.push_str("<item>");
        xml.push_str(&format!("<title>{}</title><link>{}</link>", title, link));
        if let Some(published) = published {
            xml.push_str(&format!("<pubDate>{}</pubDate>", published));
        }
        xml.push_str(&format!(
            "<description>Summary of {}</description></item>\n",
            title
        ));
    }
    xml.push_str("</channel></rss>\n");
    xml
}

/// Futures list page in the layout the default HTML selectors expect. Each
/// item is `(title, href, date)`; an empty date leaves the item undated.
pub fn headline_page(items: &[(&str, &str, &str)]) -> String {
    let mut page = String::from(
        "<html><head><title>Futures</title></head><body>\
         <div class=\"nav\"><ul><li><a href=\"/\">Home</a></li></ul></div>\
         <div class=\"temp01\"><ul>\n",
    );
    for (title, href, date) in items {
        page.push_str(&format!(
            "<li><a href=\"{}\" target=\"_blank\">{}</a><span>{}</span></li>\n",
            href, title, date
        ));
    }
    page.push_str("</ul></div></body></html>\n");
    page
}

/// `text` encoded as GB18030, which is what legacy Chinese portals serve.
pub fn gb18030(text: &str) -> Vec<u8> {
    let (bytes, _, _) = encoding_rs::GB18030.encode(text);
    bytes.into_owned()
}
