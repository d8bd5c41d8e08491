//! Content kinds and rendering to transport-ready message bodies.

use crate::model::CourseItem;

/// Closed set of item content kinds. Unknown strings from the store map to
/// [`ContentKind::Unknown`] instead of failing, so rendering stays total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Image,
    Audio,
    Video,
    Quiz,
    Unknown,
}

impl ContentKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "video" => Self::Video,
            "quiz" => Self::Quiz,
            _ => Self::Unknown,
        }
    }

    /// Bracketed tag appended for media the transport cannot send natively.
    fn media_tag(self) -> Option<&'static str> {
        match self {
            Self::Image => Some("[Image]"),
            Self::Audio => Some("[Audio]"),
            Self::Video => Some("[Video]"),
            Self::Text | Self::Quiz | Self::Unknown => None,
        }
    }
}

/// Render an item to the text body sent over the transport. Media items get a
/// bracketed type tag since only text/interactive payloads are in scope.
pub fn render(item: &CourseItem) -> String {
    let body = item.content_url.as_deref().unwrap_or(item.title.as_str());
    match item.kind().media_tag() {
        Some(tag) => format!("{body} {tag}"),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_utc;

    fn item(item_type: &str, title: &str, content_url: Option<&str>) -> CourseItem {
        CourseItem {
            id: 1,
            course_id: 1,
            tenant_id: 1,
            item_order: 0,
            item_type: item_type.to_string(),
            title: title.to_string(),
            content_url: content_url.map(str::to_string),
            metadata: None,
            required: true,
            created_at: now_utc(),
        }
    }

    #[test]
    fn text_renders_content_unchanged() {
        let i = item("text", "Welcome", Some("Welcome to the course! Reply NEXT."));
        assert_eq!(render(&i), "Welcome to the course! Reply NEXT.");
    }

    #[test]
    fn media_gets_bracketed_tag() {
        let i = item("image", "Diagram", Some("https://cdn.example.com/d.png"));
        assert_eq!(render(&i), "https://cdn.example.com/d.png [Image]");
        let i = item("video", "Intro", Some("https://cdn.example.com/v.mp4"));
        assert_eq!(render(&i), "https://cdn.example.com/v.mp4 [Video]");
        let i = item("audio", "Clip", Some("https://cdn.example.com/a.ogg"));
        assert_eq!(render(&i), "https://cdn.example.com/a.ogg [Audio]");
    }

    #[test]
    fn unknown_kind_falls_back_to_content() {
        let i = item("hologram", "Future", Some("beamed content"));
        assert_eq!(i.kind(), ContentKind::Unknown);
        assert_eq!(render(&i), "beamed content");
    }

    #[test]
    fn title_used_when_no_content_url() {
        let i = item("text", "Lesson 1", None);
        assert_eq!(render(&i), "Lesson 1");
    }
}
