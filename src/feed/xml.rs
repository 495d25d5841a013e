//! XML-family feed parsing (RSS 2.0, RSS 1.0/RDF, Atom).
//!
//! The document is read once with `quick-xml`, collecting every `<item>` and
//! `<entry>` element into a flat field list. Extraction strategies are then
//! tried in order until one yields entries:
//!
//! 1. `<item>` elements nested under `<channel>` (RSS 2.0)
//! 2. `<item>` elements anywhere (RSS 1.0/RDF puts them beside the channel)
//! 3. `<entry>` elements (Atom)

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::parser::{build_post, finalize, parse_date, permalink_id, ParseError, Post};
use crate::util::feed_domain;

/// Date fields in priority order, by local name (`date` covers `dc:date`).
const DATE_FIELDS: &[&str] = &["pubDate", "published", "updated", "date"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Item,
    Entry,
}

/// One `<link>` element's attributes.
#[derive(Debug, Default)]
struct LinkAttrs {
    rel: Option<String>,
    href: Option<String>,
}

/// A direct child element of an entry.
#[derive(Debug)]
struct RawField {
    /// Namespace prefix as written (`dc`, `media`, `a`, ...)
    prefix: Option<String>,
    name: String,
    text: String,
}

/// A raw feed entry: direct child elements and their text content.
#[derive(Debug)]
struct RawEntry {
    kind: ElementKind,
    prefix: Option<String>,
    in_channel: bool,
    fields: Vec<RawField>,
    links: Vec<LinkAttrs>,
}

impl RawEntry {
    /// Finds a non-empty field by local name. An element whose prefix matches
    /// the entry's own (`<a:title>` inside `<a:entry>`, or plain `<title>`)
    /// wins over extension elements such as `<media:title>`.
    fn field(&self, name: &str) -> Option<&str> {
        let mut candidates = self
            .fields
            .iter()
            .filter(|f| f.name == name && !f.text.trim().is_empty());
        let first = candidates.next()?;
        if first.prefix == self.prefix {
            return Some(first.text.as_str());
        }
        let preferred = candidates.find(|f| f.prefix == self.prefix).unwrap_or(first);
        Some(preferred.text.as_str())
    }

    fn href(&self) -> Option<&str> {
        let alternate = self.links.iter().find(|l| {
            l.href.is_some() && matches!(l.rel.as_deref(), None | Some("alternate"))
        });
        alternate
            .or_else(|| self.links.iter().find(|l| l.href.is_some()))
            .and_then(|l| l.href.as_deref())
    }

    fn into_post(self, domain: &str, source_url: &str) -> Post {
        let published = DATE_FIELDS
            .iter()
            .filter_map(|name| self.field(name))
            .find_map(parse_date);

        let link = self
            .field("link")
            .or_else(|| self.href())
            .or_else(|| self.field("guid").and_then(permalink_id))
            .or_else(|| self.field("id").and_then(permalink_id));

        build_post(domain, source_url, self.field("title"), published, link)
    }
}


/// Parses an XML feed document into posts.
///
/// # Arguments
///
/// * `payload` - The feed document text
/// * `source_url` - The original feed URL (used for the domain and relative links)
/// * `max` - Keep at most this many entries before filtering (`None` = all)
///
/// # Errors
///
/// - [`ParseError::Syntax`] if the document is not well-formed
/// - [`ParseError::NoItems`] if no strategy finds any entries
/// - [`ParseError::AllFiltered`] if every entry has a placeholder title
pub fn parse_xml(
    payload: &str,
    source_url: &str,
    max: Option<usize>,
) -> Result<Vec<Post>, ParseError> {
    let entries = collect_entries(payload)?;

    let strategies: [(&'static str, fn(&RawEntry) -> bool); 3] = [
        ("RSS", |e| e.kind == ElementKind::Item && e.in_channel),
        ("RDF", |e| e.kind == ElementKind::Item),
        ("Atom", |e| e.kind == ElementKind::Entry),
    ];

    let (format, selected): (&'static str, Vec<RawEntry>) = strategies
        .iter()
        .find(|(_, accept)| entries.iter().any(accept))
        .map(|(format, accept)| (*format, entries.into_iter().filter(accept).collect()))
        .unwrap_or(("XML", Vec::new()));

    let domain = feed_domain(source_url);
    let posts = selected
        .into_iter()
        .map(|e| e.into_post(&domain, source_url))
        .collect();

    finalize(posts, max, format)
}

fn collect_entries(payload: &str) -> Result<Vec<RawEntry>, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; unknown
    // entity references fail unescaping and fall back to the raw text, which
    // strip_html decodes as HTML.
    let mut reader = Reader::from_str(payload);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<RawEntry> = None;
    // Stack depth inside the open entry element
    let mut entry_depth = 0;
    let mut field: Option<RawField> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::Syntax(format!("{e} at position {}", reader.error_position())))?;

        match event {
            Event::Start(e) => {
                let local = local_name(&e);
                match current.as_mut() {
                    None if local == "item" || local == "entry" => {
                        current = Some(RawEntry {
                            kind: if local == "item" {
                                ElementKind::Item
                            } else {
                                ElementKind::Entry
                            },
                            prefix: prefix(&e),
                            in_channel: stack.iter().any(|n| n == "channel"),
                            fields: Vec::new(),
                            links: Vec::new(),
                        });
                        stack.push(local);
                        entry_depth = stack.len();
                        continue;
                    }
                    Some(entry) if stack.len() == entry_depth => {
                        if local == "link" {
                            entry.links.push(link_attrs(&e, &reader));
                        }
                        field = Some(RawField {
                            prefix: prefix(&e),
                            name: local.clone(),
                            text: String::new(),
                        });
                    }
                    _ => {}
                }
                stack.push(local);
            }
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    if stack.len() == entry_depth {
                        let name = local_name(&e);
                        if name == "link" {
                            entry.links.push(link_attrs(&e, &reader));
                        }
                        entry.fields.push(RawField {
                            prefix: prefix(&e),
                            name,
                            text: String::new(),
                        });
                    }
                }
            }
            Event::Text(t) => {
                if let Some(open) = field.as_mut() {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    push_text(&mut open.text, &text);
                }
            }
            Event::CData(c) => {
                if let Some(open) = field.as_mut() {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    push_text(&mut open.text, &text);
                }
            }
            Event::End(_) => {
                stack.pop();
                if current.is_some() && stack.len() == entry_depth {
                    if let (Some(entry), Some(open)) = (current.as_mut(), field.take()) {
                        entry.fields.push(open);
                    }
                } else if current.is_some() && stack.len() + 1 == entry_depth {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Syntax(format!(
            "unexpected end of document inside <{open}>"
        )));
    }

    Ok(entries)
}

fn push_text(buf: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn prefix(e: &BytesStart<'_>) -> Option<String> {
    e.name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
}

fn link_attrs(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> LinkAttrs {
    let mut attrs = LinkAttrs::default();
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed link attribute");
                continue;
            }
        };
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => v.into_owned(),
            Err(_) => continue,
        };
        match attr.key.as_ref() {
            b"href" => attrs.href = Some(value),
            b"rel" => attrs.rel = Some(value),
            _ => {}
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parser::{NO_DATE, NO_LINK};
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "https://blog.example.com/rss.xml";

    const RSS2: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://blog.example.com</link>
    <item>
      <title>Post One</title>
      <link>https://blog.example.com/1</link>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Post Two</title>
      <link>https://blog.example.com/2</link>
    </item>
    <item>
      <title>Post Three</title>
      <guid>https://blog.example.com/3</guid>
    </item>
  </channel>
</rss>"#;

    const RDF: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://example.org/">
    <title>RDF Feed</title>
  </channel>
  <item rdf:about="https://example.org/a">
    <title>First RDF item</title>
    <link>https://example.org/a</link>
    <dc:date>2024-02-10T12:00:00Z</dc:date>
  </item>
  <item rdf:about="https://example.org/b">
    <title>Second RDF item</title>
    <link>https://example.org/b</link>
  </item>
</rdf:RDF>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <link href="https://atom.example.com/" rel="alternate"/>
  <entry>
    <title type="html">&lt;b&gt;Bold&lt;/b&gt; entry</title>
    <link rel="self" href="https://atom.example.com/self/1"/>
    <link rel="alternate" href="/posts/1"/>
    <id>urn:uuid:1</id>
    <updated>2024-03-05T08:30:00Z</updated>
    <author><name>Someone</name></author>
  </entry>
  <entry>
    <title>Entry without link</title>
    <id>urn:uuid:2</id>
    <published>not a date</published>
  </entry>
</feed>"#;

    #[test]
    fn test_rss2_items_in_document_order() {
        let posts = parse_xml(RSS2, SOURCE, None).unwrap();
        let titles: Vec<_> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Post One", "Post Two", "Post Three"]);
        assert!(posts.iter().all(|p| p.domain == "blog.example.com"));
        assert_eq!(posts[0].date, "Jan 2, 2024");
        assert_eq!(posts[1].date, NO_DATE);
        assert_eq!(posts[2].link, "https://blog.example.com/3");
    }

    #[test]
    fn test_rss2_parse_is_idempotent() {
        let first = parse_xml(RSS2, SOURCE, None).unwrap();
        let second = parse_xml(RSS2, SOURCE, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rss2_truncation() {
        let posts = parse_xml(RSS2, SOURCE, Some(2)).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].title, "Post Two");
    }

    #[test]
    fn test_rdf_items_outside_channel() {
        let posts = parse_xml(RDF, "https://www.example.org/index.rdf", None).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "First RDF item");
        assert_eq!(posts[0].date, "Feb 10, 2024");
        assert_eq!(posts[0].domain, "example.org");
    }

    #[test]
    fn test_atom_entries() {
        let posts = parse_xml(ATOM, "https://atom.example.com/feed", None).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "Bold entry");
        // Alternate link preferred over self, resolved against the feed URL
        assert_eq!(posts[0].link, "https://atom.example.com/posts/1");
        assert_eq!(posts[0].date, "Mar 5, 2024");
        // Opaque ids are not links
        assert_eq!(posts[1].link, NO_LINK);
        assert_eq!(posts[1].date, NO_DATE);
    }

    #[test]
    fn test_nested_title_does_not_leak_into_entry() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <source><title>Upstream feed title</title></source>
    <title>The actual entry</title>
  </entry>
</feed>"#;
        let posts = parse_xml(atom, "https://example.com/atom", None).unwrap();
        assert_eq!(posts[0].title, "The actual entry");
    }

    #[test]
    fn test_cdata_title() {
        let rss = r#"<rss><channel><item>
            <title><![CDATA[Cats & <em>Dogs</em>]]></title>
            <link>https://example.com/c</link>
        </item></channel></rss>"#;
        let posts = parse_xml(rss, "https://example.com/feed", None).unwrap();
        assert_eq!(posts[0].title, "Cats & Dogs");
    }

    #[test]
    fn test_html_entity_in_title() {
        let rss = r#"<rss><channel><item>
            <title>Caf&eacute; &amp; bar&nbsp;news’ roundup</title>
        </item></channel></rss>"#;
        let posts = parse_xml(rss, "https://example.com/feed", None).unwrap();
        // HTML-only entities fail XML unescaping and are decoded from the raw text
        assert_eq!(posts[0].title, "Café & bar news’ roundup");
    }

    #[test]
    fn test_prefixed_atom_entries() {
        let atom = r#"<?xml version="1.0"?>
<a:feed xmlns:a="http://www.w3.org/2005/Atom">
  <a:title>Prefixed feed</a:title>
  <a:entry>
    <a:title>Prefixed entry title</a:title>
    <a:link rel="alternate" href="https://example.com/p/1"/>
    <a:updated>2024-03-05T08:30:00Z</a:updated>
  </a:entry>
</a:feed>"#;
        let posts = parse_xml(atom, "https://example.com/atom", None).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "Prefixed entry title");
        assert_eq!(posts[0].link, "https://example.com/p/1");
        assert_eq!(posts[0].date, "Mar 5, 2024");
    }

    #[test]
    fn test_extension_title_does_not_shadow_entry_title() {
        let rss = r#"<rss xmlns:media="http://search.yahoo.com/mrss/"><channel><item>
            <media:title>Thumbnail caption</media:title>
            <title>Real item title</title>
        </item></channel></rss>"#;
        let posts = parse_xml(rss, "https://example.com/feed", None).unwrap();
        assert_eq!(posts[0].title, "Real item title");
    }

    #[test]
    fn test_placeholder_titles_filtered() {
        let rss = r#"<rss><channel>
            <item><title>Hi</title></item>
            <item><link>https://example.com/untitled</link></item>
            <item><title>Long enough</title></item>
        </channel></rss>"#;
        let posts = parse_xml(rss, "https://example.com/feed", None).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "Long enough");
    }

    #[test]
    fn test_all_filtered_is_error() {
        let rss = r#"<rss><channel><item><title>X</title></item></channel></rss>"#;
        assert_eq!(
            parse_xml(rss, "https://example.com/feed", None),
            Err(ParseError::AllFiltered(1))
        );
    }

    #[test]
    fn test_syntax_error() {
        let result = parse_xml("<rss><channel><item></channel></rss>", SOURCE, None);
        assert!(matches!(result, Err(ParseError::Syntax(_))));
    }

    #[test]
    fn test_truncated_document_is_syntax_error() {
        let result = parse_xml("<rss><channel><item><title>Cut off", SOURCE, None);
        assert!(matches!(result, Err(ParseError::Syntax(_))));
    }

    #[test]
    fn test_no_items() {
        let result = parse_xml(
            r#"<rss version="2.0"><channel><title>Empty</title></channel></rss>"#,
            SOURCE,
            None,
        );
        assert_eq!(result, Err(ParseError::NoItems("XML")));
    }

    #[test]
    fn test_date_priority_falls_through_unparseable() {
        let rss = r#"<rss><channel><item>
            <title>Dated item</title>
            <pubDate>garbage</pubDate>
            <dc:date>2023-12-25T00:00:00Z</dc:date>
        </item></channel></rss>"#;
        let posts = parse_xml(rss, "https://example.com/feed", None).unwrap();
        assert_eq!(posts[0].date, "Dec 25, 2023");
    }

    #[test]
    fn test_link_fallback_order() {
        let rss = r#"<rss><channel>
            <item><title>Has text link</title><link>https://a.example/1</link><guid>https://a.example/g</guid></item>
            <item><title>Has guid only</title><guid>https://a.example/g2</guid></item>
            <item><title>Opaque guid</title><guid isPermaLink="false">1234</guid></item>
        </channel></rss>"#;
        let posts = parse_xml(rss, "https://a.example/feed", None).unwrap();
        assert_eq!(posts[0].link, "https://a.example/1");
        assert_eq!(posts[1].link, "https://a.example/g2");
        assert_eq!(posts[2].link, NO_LINK);
    }
}
