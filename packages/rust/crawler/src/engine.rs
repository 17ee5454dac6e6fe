//! Paginated listing crawler.
//!
//! One [`ListingCrawler`] owns its own HTTP client and walks a single
//! category's listing: fetch the first page, extract its rows, follow the
//! "next" link, and stop at the page limit, at the last page, or when a link
//! leaves the listing host or revisits a page.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use reqwest::Client;
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

use confmap_shared::{Category, ConfMapError, CrawlConfig, RawRow, Result};

use crate::listing::{ListingPage, extract_listing};

/// User-Agent string for listing requests.
const USER_AGENT: &str = concat!("confmap/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// CrawlResult
// ---------------------------------------------------------------------------

/// Summary of one category's completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// Number of listing pages fetched.
    pub pages_fetched: u32,
    /// Extracted rows across all pages, positions assigned in document order.
    pub rows: Vec<RawRow>,
    /// Total duration of the crawl.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// ListingCrawler
// ---------------------------------------------------------------------------

/// Fetches and extracts one category's listing pages.
pub struct ListingCrawler {
    config: CrawlConfig,
    client: Client,
}

impl ListingCrawler {
    /// Create a crawler with a fresh HTTP client.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfMapError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// First listing page for a category.
    pub fn listing_url(&self, category: &Category) -> Result<Url> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(category.label().as_bytes()).collect();
        let raw = self.config.start_url_template.replace("{}", &encoded);
        Url::parse(&raw).map_err(|e| ConfMapError::config(format!("invalid listing URL {raw}: {e}")))
    }

    /// Lazy page sequence for a category.
    pub fn pages(&self, category: &Category) -> Result<ListingPages<'_>> {
        let start = self.listing_url(category)?;
        Ok(ListingPages {
            crawler: self,
            host: start.host_str().unwrap_or_default().to_string(),
            next: Some(start),
            visited: HashSet::new(),
            fetched: 0,
        })
    }

    /// Crawl every page of a category's listing and collect its rows.
    #[instrument(skip_all, fields(category = %category))]
    pub async fn crawl(&self, category: &Category) -> Result<CrawlResult> {
        let start_time = Instant::now();
        let mut pages = self.pages(category)?;
        let mut rows: Vec<RawRow> = Vec::new();

        info!(
            max_pages = self.config.max_pages,
            rate_limit_ms = self.config.rate_limit_ms,
            "starting crawl"
        );

        while let Some(page) = pages.next_page().await? {
            let offset = rows.len();
            rows.extend(
                page.rows
                    .into_iter()
                    .enumerate()
                    .map(|(i, data)| RawRow::new(offset + i, data)),
            );
        }

        let result = CrawlResult {
            pages_fetched: pages.fetched(),
            rows,
            duration: start_time.elapsed(),
        };

        info!(
            pages_fetched = result.pages_fetched,
            rows = result.rows.len(),
            duration_ms = result.duration.as_millis(),
            "crawl completed"
        );

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// ListingPages
// ---------------------------------------------------------------------------

/// Finite, non-restartable sequence of listing pages.
pub struct ListingPages<'a> {
    crawler: &'a ListingCrawler,
    host: String,
    next: Option<Url>,
    visited: HashSet<String>,
    fetched: u32,
}

impl ListingPages<'_> {
    /// Fetch and extract the next page, or `None` once pagination ends.
    pub async fn next_page(&mut self) -> Result<Option<ListingPage>> {
        let config = &self.crawler.config;
        if self.fetched >= config.max_pages {
            if let Some(url) = self.next.take() {
                debug!(%url, max_pages = config.max_pages, "page limit reached");
            }
            return Ok(None);
        }

        let Some(url) = self.next.take() else {
            return Ok(None);
        };

        if self.fetched > 0 && config.rate_limit_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.rate_limit_ms)).await;
        }

        let body = fetch_page(&self.crawler.client, &url).await?;
        self.fetched += 1;
        self.visited.insert(url.to_string());

        let page = {
            let doc = Html::parse_document(&body);
            extract_listing(&doc, &url)?
        };
        debug!(%url, rows = page.rows.len(), "page extracted");

        self.next = page.next.clone().filter(|next| self.should_follow(next));
        Ok(Some(page))
    }

    /// Pages fetched so far.
    pub fn fetched(&self) -> u32 {
        self.fetched
    }

    fn should_follow(&self, next: &Url) -> bool {
        if next.host_str().unwrap_or_default() != self.host {
            warn!(%next, "next link leaves the listing host, stopping");
            return false;
        }
        if self.visited.contains(next.as_str()) {
            debug!(%next, "next link revisits a page, stopping");
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// Fetch one page body, failing on transport errors and non-success statuses.
async fn fetch_page(client: &Client, url: &Url) -> Result<String> {
    debug!(%url, "fetching page");

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| ConfMapError::fetch(url.as_str(), e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ConfMapError::fetch(url.as_str(), format!("HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| ConfMapError::fetch(url.as_str(), format!("body read failed: {e}")))
}

#[cfg(test)]
mod crawler_tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, max_pages: u32) -> CrawlConfig {
        CrawlConfig {
            start_url_template: format!("{}/cfp/call?conference={{}}", server.uri()),
            max_pages,
            timeout: Duration::from_secs(5),
            rate_limit_ms: 0,
        }
    }

    fn listing(rows: &[&str], next: Option<&str>) -> String {
        let body: String = rows
            .iter()
            .map(|row| {
                let cells: String = row.split("||||").map(|c| format!("<td>{c}</td>")).collect();
                format!("<tr>{cells}</tr>")
            })
            .collect();
        let next = next
            .map(|href| format!(r#"<a href="{href}">next</a>"#))
            .unwrap_or_default();
        format!(
            r#"<html><body><div class="contsec"><table cellpadding="3" cellspacing="1">
            <tr><td>Event</td><td>When</td><td>Where</td><td>Deadline</td></tr>{body}</table>{next}</div></body></html>"#
        )
    }

    #[test]
    fn listing_url_encodes_label() {
        let crawler = ListingCrawler::new(CrawlConfig {
            start_url_template: "http://www.wikicfp.com/cfp/call?conference={}".into(),
            max_pages: 1,
            timeout: Duration::from_secs(5),
            rate_limit_ms: 0,
        })
        .unwrap();
        let cat = Category::new("machine learning").unwrap();
        assert_eq!(
            crawler.listing_url(&cat).unwrap().as_str(),
            "http://www.wikicfp.com/cfp/call?conference=machine+learning"
        );
    }

    #[tokio::test]
    async fn crawl_follows_next_links_across_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/cfp/call"))
            .and(query_param("conference", "machine learning"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(
                &["ABC||||Conf One", "Jan 1, 2024 - Jan 3, 2024||||New York||||Dec 1, 2023"],
                Some("/cfp/page2"),
            )))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/cfp/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(
                &["Expired", "XYZ||||Conf Two"],
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let crawler = ListingCrawler::new(config_for(&server, 20)).unwrap();
        let cat = Category::new("machine learning").unwrap();
        let result = crawler.crawl(&cat).await.expect("crawl");

        assert_eq!(result.pages_fetched, 2);
        let data: Vec<&str> = result.rows.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(
            data,
            vec![
                "ABC||||Conf One",
                "Jan 1, 2024 - Jan 3, 2024||||New York||||Dec 1, 2023",
                "Expired",
                "XYZ||||Conf Two",
            ]
        );
        let positions: Vec<usize> = result.rows.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn crawl_respects_page_limit() {
        let server = MockServer::start().await;

        Mock::given(path("/cfp/call"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&["A||||1"], Some("/p2"))),
            )
            .mount(&server)
            .await;
        Mock::given(path("/p2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&["B||||2"], Some("/p3"))),
            )
            .mount(&server)
            .await;
        Mock::given(path("/p3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["C||||3"], None)))
            .expect(0)
            .mount(&server)
            .await;

        let crawler = ListingCrawler::new(config_for(&server, 2)).unwrap();
        let cat = Category::new("robotics").unwrap();
        let result = crawler.crawl(&cat).await.expect("crawl");

        assert_eq!(result.pages_fetched, 2);
        assert_eq!(result.rows.len(), 2);
    }

    #[tokio::test]
    async fn crawl_stops_on_revisited_page() {
        let server = MockServer::start().await;

        Mock::given(path("/cfp/call"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&["A||||1"], Some("/p2"))),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/p2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(
                &["B||||2"],
                Some("/cfp/call?conference=robotics"),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let crawler = ListingCrawler::new(config_for(&server, 20)).unwrap();
        let cat = Category::new("robotics").unwrap();
        let result = crawler.crawl(&cat).await.expect("crawl");
        assert_eq!(result.pages_fetched, 2);
    }

    #[tokio::test]
    async fn http_error_aborts_crawl() {
        let server = MockServer::start().await;

        Mock::given(path("/cfp/call"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&["A||||1"], Some("/p2"))),
            )
            .mount(&server)
            .await;
        Mock::given(path("/p2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let crawler = ListingCrawler::new(config_for(&server, 20)).unwrap();
        let cat = Category::new("robotics").unwrap();
        let err = crawler.crawl(&cat).await.unwrap_err();
        assert!(matches!(err, ConfMapError::Fetch { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn pages_are_not_restartable() {
        let server = MockServer::start().await;

        Mock::given(path("/cfp/call"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["A||||1"], None)))
            .expect(1)
            .mount(&server)
            .await;

        let crawler = ListingCrawler::new(config_for(&server, 20)).unwrap();
        let cat = Category::new("robotics").unwrap();
        let mut pages = crawler.pages(&cat).unwrap();

        assert!(pages.next_page().await.unwrap().is_some());
        assert!(pages.next_page().await.unwrap().is_none());
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(pages.fetched(), 1);
    }
}
