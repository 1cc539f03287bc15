const MAX_TITLE_CHARS: usize = 100;

/// Replace characters that are illegal in file names and cap the length.
pub fn sanitize_title(title: &str) -> String {
    title
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_TITLE_CHARS)
        .collect()
}

/// `{title}_{resolution}_{timestamp}{extension}`, falling back to `rplay` when
/// the page title is unknown or empty.
pub fn output_file_name(
    title: Option<&str>,
    resolution: &str,
    timestamp_millis: i64,
    extension: &str,
) -> String {
    let title = title
        .map(sanitize_title)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "rplay".to_string());
    format!("{title}_{resolution}_{timestamp_millis}{extension}")
}

/// Same as [output_file_name], stamped with the current time.
pub fn output_file_name_now(title: Option<&str>, resolution: &str, extension: &str) -> String {
    output_file_name(
        title,
        resolution,
        chrono::Utc::now().timestamp_millis(),
        extension,
    )
}
