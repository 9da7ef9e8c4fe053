//! Directory listing detection and address normalization.

use std::sync::OnceLock;

use lol_html::element;
use url::Url;

use crate::document::DocumentHost;
use crate::error::Result;

/// Scheme of the stylesheet the browser injects into its directory listings.
pub const HOST_STYLESHEET_SCHEME: &str = "chrome:";

/// Recognises host-generated directory listings, which can be neither
/// rewritten nor trusted to keep their address.
pub trait DirectoryListingPredicate: Send + Sync {
    fn is_directory_listing(&self, host: &dyn DocumentHost) -> bool;
}

impl<F> DirectoryListingPredicate for F
where
    F: Fn(&dyn DocumentHost) -> bool + Send + Sync,
{
    fn is_directory_listing(&self, host: &dyn DocumentHost) -> bool {
        self(host)
    }
}

/// Default heuristic: a `chrome:` stylesheet link plus a `<base>` pointing
/// inside the document's own address.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostStylesheetListing;

impl DirectoryListingPredicate for HostStylesheetListing {
    fn is_directory_listing(&self, host: &dyn DocumentHost) -> bool {
        match host.serialize() {
            Ok(markup) => scan_directory_listing(&markup, &host.url()),
            Err(e) => {
                tracing::debug!("Can't serialize {} for listing check: {}", host.url(), e);
                false
            }
        }
    }
}

/// Scan markup for the directory listing signature.
pub fn scan_directory_listing(markup: &str, document_url: &str) -> bool {
    if markup.is_empty() {
        return false;
    }

    let host_stylesheet = OnceLock::new();
    let matching_base = OnceLock::new();

    let rewriter_settings: lol_html::Settings<'_, '_, lol_html::send::SendHandlerTypes> =
        lol_html::send::Settings {
            element_content_handlers: vec![
                element!("link[href]", |el: &mut lol_html::send::Element<'_, '_>| {
                    let stylesheet = el.get_attribute("rel").is_some_and(|rel| {
                        rel.split_ascii_whitespace()
                            .any(|r| r.eq_ignore_ascii_case("stylesheet"))
                    });
                    if stylesheet
                        && el
                            .get_attribute("href")
                            .is_some_and(|href| href.starts_with(HOST_STYLESHEET_SCHEME))
                    {
                        let _ = host_stylesheet.set(());
                    }
                    Ok(())
                }),
                element!("base[href]", |el: &mut lol_html::send::Element<'_, '_>| {
                    if el
                        .get_attribute("href")
                        .is_some_and(|href| href.starts_with(document_url))
                    {
                        let _ = matching_base.set(());
                    }
                    Ok(())
                }),
            ],
            ..lol_html::send::Settings::new_for_handler_types()
        };

    let mut rewriter = lol_html::send::HtmlRewriter::new(rewriter_settings, |_: &[u8]| {});

    let scanned = match rewriter.write(markup.as_bytes()) {
        Ok(()) => rewriter.end(),
        Err(e) => Err(e),
    };
    if let Err(e) = scanned {
        tracing::debug!("Can't scan {} for listing markers: {}", document_url, e);
    }

    host_stylesheet.get().is_some() && matching_base.get().is_some()
}

/// The canonical address of a directory served under its slash-less form:
/// `Some(base)` when `base_uri` is exactly `document_url` plus a trailing `/`.
pub fn canonical_directory_url(document_url: &str, base_uri: &str) -> Result<Option<Url>> {
    match base_uri.strip_suffix('/') {
        Some(stripped) if stripped == document_url => Ok(Some(Url::parse(base_uri)?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><head>
<base href="file:///home/user/docs/">
<link rel="stylesheet" media="screen, projection" type="text/css" href="chrome://global/skin/dirListing/dirListing.css">
<title>Index of file:///home/user/docs/</title>
</head><body><table><tr><td><a href="notes.txt">notes.txt</a></td></tr></table></body></html>"#;

    #[test]
    fn recognises_listings() {
        assert!(scan_directory_listing(LISTING, "file:///home/user/docs"));
        assert!(scan_directory_listing(LISTING, "file:///home/user/docs/"));
    }

    #[test]
    fn needs_both_markers() {
        let no_base = LISTING.replace(r#"<base href="file:///home/user/docs/">"#, "");
        assert!(!scan_directory_listing(&no_base, "file:///home/user/docs"));

        let page_stylesheet = LISTING.replace("chrome://global", "file:///home/user");
        assert!(!scan_directory_listing(&page_stylesheet, "file:///home/user/docs"));

        assert!(!scan_directory_listing(LISTING, "file:///elsewhere"));
        assert!(!scan_directory_listing("", "file:///home/user/docs"));
    }

    #[test]
    fn truncated_markup_is_not_a_listing() {
        let cut = &LISTING[..LISTING.find("<link").unwrap() + 12];
        assert!(!scan_directory_listing(cut, "file:///home/user/docs"));
    }

    #[test]
    fn canonical_form_adds_the_slash() {
        let url = canonical_directory_url("file:///home/user/docs", "file:///home/user/docs/")
            .unwrap()
            .unwrap();
        assert_eq!(url.as_str(), "file:///home/user/docs/");

        assert!(canonical_directory_url("file:///home/user/docs/", "file:///home/user/docs/")
            .unwrap()
            .is_none());
        assert!(canonical_directory_url("file:///a/b.html", "file:///a/")
            .unwrap()
            .is_none());
    }
}
