use once_cell::sync::Lazy;
use regex::Regex;

// Matches watch?v=, embed/ and youtu.be short links; capture group is the
// canonical video id.
static EMBED_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:youtube\.com/(?:watch\?v=|embed/)|youtu\.be/)([^&?/]+)").expect("embed regex")
});

static LOCAL_VIDEO_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(mp4|mov)$").expect("video ext regex"));

/// A single media attachment, classified for rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaRef {
    Image { url: String },
    LocalVideo { url: String },
    EmbedVideo { video_id: String },
}

impl MediaRef {
    pub fn is_local_video(&self) -> bool {
        matches!(self, MediaRef::LocalVideo { .. })
    }
}

/// Classify a media reference. Embed-provider URLs win over the local video
/// extension check, which wins over the image fallback; an empty or missing
/// reference means the card has no content to show.
pub fn classify_media(reference: Option<&str>) -> Option<MediaRef> {
    let raw = reference?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(caps) = EMBED_ID.captures(raw) {
        let video_id = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !video_id.is_empty() {
            return Some(MediaRef::EmbedVideo {
                video_id: video_id.to_string(),
            });
        }
    }
    if LOCAL_VIDEO_EXT.is_match(raw) {
        return Some(MediaRef::LocalVideo {
            url: raw.to_string(),
        });
    }
    Some(MediaRef::Image {
        url: raw.to_string(),
    })
}

/// One feed entry as the playback coordinator sees it: the survey id plus
/// its classified primary attachment. Rebuilt wholesale on every refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedItem {
    pub id: i64,
    pub media: Option<MediaRef>,
}

impl FeedItem {
    pub fn new(id: i64, media_url: Option<&str>, media_urls: &[String]) -> Self {
        let media = classify_media(media_url).or_else(|| {
            media_urls
                .iter()
                .find_map(|url| classify_media(Some(url.as_str())))
        });
        FeedItem { id, media }
    }
}

pub const EXPIRED_LABEL: &str = "Expired";

/// Render a remaining-seconds value the way the cards show it.
pub fn format_countdown(seconds: i64) -> String {
    if seconds <= 0 {
        return EXPIRED_LABEL.to_string();
    }
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {secs}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

/// Client-side percentage computation for result bars, one decimal place.
/// All zeros when nobody voted; the server response carries percentages for
/// closed surveys but omits them in a few listing variants.
pub fn vote_percentages(counts: &[i64]) -> Vec<f64> {
    let total: i64 = counts.iter().sum();
    if total <= 0 {
        return vec![0.0; counts.len()];
    }
    counts
        .iter()
        .map(|count| {
            let pct = *count as f64 / total as f64 * 100.0;
            (pct * 10.0).round() / 10.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_watch_urls_as_embeds() {
        let media = classify_media(Some("https://youtube.com/watch?v=abc123")).unwrap();
        assert_eq!(
            media,
            MediaRef::EmbedVideo {
                video_id: "abc123".into()
            }
        );
    }

    #[test]
    fn classifies_short_and_embed_urls() {
        assert_eq!(
            classify_media(Some("https://youtu.be/xyz789")).unwrap(),
            MediaRef::EmbedVideo {
                video_id: "xyz789".into()
            }
        );
        assert_eq!(
            classify_media(Some("https://www.youtube.com/embed/QQ11?autoplay=1")).unwrap(),
            MediaRef::EmbedVideo {
                video_id: "QQ11".into()
            }
        );
    }

    #[test]
    fn embed_wins_over_extension() {
        // A provider URL must never fall through to the image branch.
        let media = classify_media(Some("https://youtube.com/watch?v=clip.mp4")).unwrap();
        assert!(matches!(media, MediaRef::EmbedVideo { .. }));
    }

    #[test]
    fn classifies_local_video_extensions_case_insensitively() {
        assert_eq!(
            classify_media(Some("https://cdn.test/clip.MOV")).unwrap(),
            MediaRef::LocalVideo {
                url: "https://cdn.test/clip.MOV".into()
            }
        );
        assert_eq!(
            classify_media(Some("clip.mp4")).unwrap(),
            MediaRef::LocalVideo {
                url: "clip.mp4".into()
            }
        );
    }

    #[test]
    fn everything_else_is_an_image() {
        assert_eq!(
            classify_media(Some("https://cdn.test/pic.jpg")).unwrap(),
            MediaRef::Image {
                url: "https://cdn.test/pic.jpg".into()
            }
        );
    }

    #[test]
    fn missing_reference_is_no_content() {
        assert!(classify_media(None).is_none());
        assert!(classify_media(Some("")).is_none());
        assert!(classify_media(Some("   ")).is_none());
    }

    #[test]
    fn feed_item_falls_back_to_gallery() {
        let urls = vec!["https://cdn.test/a.png".to_string()];
        let item = FeedItem::new(7, None, &urls);
        assert_eq!(
            item.media,
            Some(MediaRef::Image {
                url: "https://cdn.test/a.png".into()
            })
        );
    }

    #[test]
    fn countdown_decomposes_units() {
        assert_eq!(format_countdown(90_061), "1d 1h 1m 1s");
        assert_eq!(format_countdown(3_725), "1h 2m 5s");
        assert_eq!(format_countdown(65), "1m 5s");
        assert_eq!(format_countdown(9), "9s");
    }

    #[test]
    fn countdown_expires_at_zero() {
        assert_eq!(format_countdown(0), EXPIRED_LABEL);
        assert_eq!(format_countdown(-5), EXPIRED_LABEL);
    }

    #[test]
    fn percentages_round_to_one_decimal() {
        assert_eq!(vote_percentages(&[1, 2]), vec![33.3, 66.7]);
        assert_eq!(vote_percentages(&[2, 2]), vec![50.0, 50.0]);
    }

    #[test]
    fn percentages_all_zero_without_votes() {
        assert_eq!(vote_percentages(&[0, 0, 0]), vec![0.0, 0.0, 0.0]);
        assert!(vote_percentages(&[]).is_empty());
    }
}
