//! Extraction of conference rows and the pagination link from one listing page.
//!
//! The listing has a fixed shape: a single `table[cellpadding="3"][cellspacing="1"]`
//! inside a `div.contsec` container, one header row per row group, and an
//! optional anchor whose text contains `next`.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use confmap_shared::{ConfMapError, ROW_DELIMITER, Result};

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"div.contsec table[cellpadding="3"][cellspacing="1"]"#)
        .expect("static table selector")
});
static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("static row selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("static cell selector"));
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static link selector"));

/// Text that marks the pagination anchor.
const NEXT_LINK_TEXT: &str = "next";

/// Rows and pagination extracted from one listing page.
#[derive(Debug, Clone)]
pub struct ListingPage {
    /// URL the page was fetched from.
    pub url: Url,
    /// Delimited rows in document order, header rows excluded.
    pub rows: Vec<String>,
    /// Resolved target of the "next" anchor, if any.
    pub next: Option<Url>,
}

/// Extract the listing rows and next link from a parsed page.
///
/// Fails when the content table is missing, since that means the page
/// is not a listing page at all.
pub fn extract_listing(doc: &Html, url: &Url) -> Result<ListingPage> {
    let mut tables = doc.select(&TABLE_SEL);
    let table = tables
        .next()
        .ok_or_else(|| ConfMapError::fetch(url.as_str(), "listing table not found"))?;
    if tables.next().is_some() {
        tracing::warn!(%url, "more than one listing table, using the first");
    }

    let rows = table
        .select(&ROW_SEL)
        .filter(|row| !is_group_header(row))
        .map(|row| flatten_row(&row))
        .collect();

    Ok(ListingPage {
        url: url.clone(),
        rows,
        next: find_next_link(doc, url),
    })
}

/// Trim each cell's text and join with the row delimiter.
fn flatten_row(row: &ElementRef<'_>) -> String {
    row.select(&CELL_SEL)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect::<Vec<_>>()
        .join(ROW_DELIMITER)
}

/// The first `tr` among its siblings is the column header.
fn is_group_header(row: &ElementRef<'_>) -> bool {
    !row.prev_siblings()
        .filter_map(ElementRef::wrap)
        .any(|el| el.value().name() == "tr")
}

/// Resolve the first anchor whose text mentions "next".
fn find_next_link(doc: &Html, base: &Url) -> Option<Url> {
    doc.select(&LINK_SEL)
        .filter(|a| a.text().any(|t| t.contains(NEXT_LINK_TEXT)))
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| {
            let mut resolved = base.join(href).ok()?;
            resolved.set_fragment(None);
            Some(resolved)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://www.wikicfp.com/cfp/call?conference=robotics").unwrap()
    }

    const LISTING: &str = r##"<html><body>
        <div class="menu"><table cellpadding="3" cellspacing="1"><tr><td>decoy</td></tr><tr><td>a</td><td>b</td></tr></table></div>
        <div class="contsec"><center><form>
        <table cellpadding="3" cellspacing="1" align="center" width="100%">
          <tr bgcolor="#bbbbbb"><td>Event</td><td>When</td><td>Where</td><td>Deadline</td></tr>
          <tr><td rowspan="2"><a href="/cfp/servlet/event.showcfp?eventid=1">ABC 2024</a></td><td colspan="3"> Conf One </td></tr>
          <tr><td>Jan 1, 2024 - Jan 3, 2024</td><td>New York</td><td>Dec 1, 2023</td></tr>
          <tr><td colspan="4">Expired CFPs</td></tr>
          <tr><td rowspan="2">XYZ 2024</td><td colspan="3">Conf Two</td></tr>
          <tr><td>Feb 1, 2024 - Feb 2, 2024</td><td>Virtual Conference</td><td>Jan 1, 2024</td></tr>
        </table>
        </form></center>
        <a href="/cfp/call?conference=robotics&amp;page=2#top">next</a>
        </div>
    </body></html>"##;

    #[test]
    fn extracts_rows_in_document_order() {
        let doc = Html::parse_document(LISTING);
        let page = extract_listing(&doc, &base()).expect("listing");

        assert_eq!(
            page.rows,
            vec![
                "ABC 2024||||Conf One",
                "Jan 1, 2024 - Jan 3, 2024||||New York||||Dec 1, 2023",
                "Expired CFPs",
                "XYZ 2024||||Conf Two",
                "Feb 1, 2024 - Feb 2, 2024||||Virtual Conference||||Jan 1, 2024",
            ]
        );
    }

    #[test]
    fn resolves_next_link_without_fragment() {
        let doc = Html::parse_document(LISTING);
        let page = extract_listing(&doc, &base()).expect("listing");
        let next = page.next.expect("next link");
        assert_eq!(
            next.as_str(),
            "http://www.wikicfp.com/cfp/call?conference=robotics&page=2"
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let html = r#"<div class="contsec"><table cellpadding="3" cellspacing="1">
            <tr><td>Event</td></tr>
            <tr><td>ABC</td><td>Conf</td></tr>
        </table><a href="/cfp/call?page=1">previous</a></div>"#;
        let doc = Html::parse_document(html);
        let page = extract_listing(&doc, &base()).expect("listing");
        assert_eq!(page.rows, vec!["ABC||||Conf"]);
        assert!(page.next.is_none());
    }

    #[test]
    fn empty_rows_pass_through() {
        let html = r#"<div class="contsec"><table cellpadding="3" cellspacing="1">
            <tr><td>Event</td></tr>
            <tr></tr>
            <tr><td> </td><td></td></tr>
        </table></div>"#;
        let doc = Html::parse_document(html);
        let page = extract_listing(&doc, &base()).expect("listing");
        assert_eq!(page.rows, vec!["", "||||"]);
    }

    #[test]
    fn missing_table_is_a_fetch_error() {
        let doc = Html::parse_document("<html><body><p>Service unavailable</p></body></html>");
        let err = extract_listing(&doc, &base()).unwrap_err();
        assert!(matches!(err, ConfMapError::Fetch { .. }));
        assert!(err.to_string().contains("listing table not found"));
    }
}
