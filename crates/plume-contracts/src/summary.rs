use crate::error::ErrorInfo;

/// Inputs for the markdown block shown to the chat user.
#[derive(Debug, Clone, Default)]
pub struct SummaryOptions<'a> {
    pub prompt: &'a str,
    pub revised_prompt: Option<&'a str>,
    pub model: Option<&'a str>,
    pub extra: Vec<(String, String)>,
}

/// Renders persisted image URLs plus prompt details as markdown.
pub fn render_images(urls: &[&str], options: &SummaryOptions<'_>) -> String {
    let numbered = urls.len() > 1;
    let mut markdown = urls
        .iter()
        .enumerate()
        .map(|(idx, url)| {
            if numbered {
                format!("![Generated Image {}]({url})", idx + 1)
            } else {
                format!("![Generated Image]({url})")
            }
        })
        .collect::<Vec<String>>()
        .join("\n\n");

    markdown.push_str("\n\n---");
    markdown.push_str(&format!("\n\n**Prompt**: {}", options.prompt));
    if let Some(revised) = options.revised_prompt.filter(|value| !value.is_empty()) {
        markdown.push_str(&format!("\n\n**Revised prompt**: {revised}"));
    }
    if let Some(model) = options.model {
        markdown.push_str(&format!("\n\n**Model**: `{model}`"));
    }
    for (key, value) in &options.extra {
        markdown.push_str(&format!("\n*{key}: {value}*"));
    }
    markdown.trim().to_string()
}

pub fn render_error(error: &ErrorInfo) -> String {
    let mut markdown = format!("### Image generation failed\n\n**Reason**: {}", error.message);
    if let Some(code) = error.code.as_deref() {
        markdown.push_str(&format!(" (code: {code})"));
    }
    markdown.push_str(&format!("\n\n*{}*", error.kind));
    markdown
}

#[cfg(test)]
mod tests {
    use super::{render_error, render_images, SummaryOptions};
    use crate::error::{ErrorInfo, ErrorKind};

    #[test]
    fn single_image_is_not_numbered() {
        let markdown = render_images(
            &["https://blob.example/a.png"],
            &SummaryOptions {
                prompt: "a cat",
                model: Some("grok-2-image"),
                ..SummaryOptions::default()
            },
        );
        assert!(markdown.starts_with("![Generated Image](https://blob.example/a.png)"));
        assert!(markdown.contains("**Prompt**: a cat"));
        assert!(markdown.contains("**Model**: `grok-2-image`"));
        assert!(!markdown.contains("Revised prompt"));
    }

    #[test]
    fn multiple_images_are_numbered_with_extras() {
        let markdown = render_images(
            &["https://a", "https://b"],
            &SummaryOptions {
                prompt: "two cats",
                revised_prompt: Some("two tabby cats"),
                model: None,
                extra: vec![("Size".to_string(), "1024x1024".to_string())],
            },
        );
        assert!(markdown.contains("![Generated Image 1](https://a)"));
        assert!(markdown.contains("![Generated Image 2](https://b)"));
        assert!(markdown.contains("**Revised prompt**: two tabby cats"));
        assert!(markdown.ends_with("*Size: 1024x1024*"));
    }

    #[test]
    fn error_block_mentions_vendor_code() {
        let markdown = render_error(&ErrorInfo {
            kind: ErrorKind::ContentModerationError,
            message: "prompt failed review".to_string(),
            code: Some("50412".to_string()),
        });
        assert!(markdown.contains("prompt failed review (code: 50412)"));
        assert!(markdown.contains("ContentModerationError"));
    }
}
