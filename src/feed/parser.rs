use feed_rs::parser;
use std::collections::BTreeSet;

/// Where an entry image reference came from.
///
/// The formatter prefers dedicated media attachments over plain links, so the
/// origin is kept alongside the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageKind {
    /// A `media:content` / `media:thumbnail` style attachment.
    Media,
    /// A `<link>` or enclosure, with its declared MIME type if any.
    Link { media_type: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryImage {
    pub url: String,
    pub kind: ImageKind,
}

/// A feed entry normalized away from RSS/Atom differences.
///
/// Transient: produced on every poll and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    /// Unix seconds. `None` when the source provided neither a published nor
    /// an updated date.
    pub published_at: Option<i64>,
    pub tags: BTreeSet<String>,
    pub images: Vec<EntryImage>,
}

/// Parses RSS/Atom bytes into entries, preserving the document order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());
            let published_at = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry.title.map(|t| t.content);

            let tags = entry
                .categories
                .into_iter()
                .map(|c| c.term)
                .filter(|t| !t.trim().is_empty())
                .collect();

            let mut images: Vec<EntryImage> = entry
                .media
                .iter()
                .flat_map(|m| {
                    m.content
                        .iter()
                        .filter_map(|c| c.url.as_ref().map(|u| u.to_string()))
                        .chain(m.thumbnails.iter().map(|t| t.image.uri.clone()))
                })
                .map(|url| EntryImage {
                    url,
                    kind: ImageKind::Media,
                })
                .collect();

            images.extend(entry.links.into_iter().map(|l| EntryImage {
                url: l.href,
                kind: ImageKind::Link {
                    media_type: l.media_type,
                },
            }));

            FeedEntry {
                title,
                link,
                summary,
                published_at,
                tags,
                images,
            }
        })
        .collect();

    Ok(entries)
}
