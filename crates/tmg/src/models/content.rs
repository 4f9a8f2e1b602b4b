use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// Base64 encoded image bytes
    pub data: String,
    pub mime_type: String,
}

/// A reference to a file the backend fetches by itself (e.g. an attachment URL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub uri: String,
    pub mime_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// Content passed to or from an LLM
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
    File(FileContent),
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        Content::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    pub fn file<U, M, N>(uri: U, mime_type: M, name: N) -> Self
    where
        U: Into<String>,
        M: Into<String>,
        N: Into<String>,
    {
        Content::File(FileContent {
            uri: uri.into(),
            mime_type: mime_type.into(),
            name: name.into(),
        })
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    /// Get the image content if this is an ImageContent variant
    pub fn as_image(&self) -> Option<(&str, &str)> {
        match self {
            Content::Image(image) => Some((&image.data, &image.mime_type)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let text = Content::text("hola");
        assert_eq!(text.as_text(), Some("hola"));
        assert_eq!(text.as_image(), None);

        let image = Content::image("aGVsbG8=", "image/png");
        assert_eq!(image.as_image(), Some(("aGVsbG8=", "image/png")));
        assert_eq!(image.as_text(), None);
    }

    #[test]
    fn test_serialization_is_tagged() {
        let file = Content::file("https://cdn.example/a.pdf", "application/pdf", "a.pdf");
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["type"], "file");
        assert_eq!(value["mimeType"], "application/pdf");
    }
}
