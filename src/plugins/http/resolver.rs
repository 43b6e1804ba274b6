use sanitize_filename::sanitize;
use url::Url;

const FALLBACK_NAME: &str = "download.bin";

/// Local file name for a download: the last path segment of the URL.
pub fn output_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|s| s.last())
        .filter(|s| !s.is_empty())
        .map(|s| sanitize(s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(u: &str) -> String {
        output_name_for(&Url::parse(u).unwrap())
    }

    #[test]
    fn takes_last_path_segment() {
        assert_eq!(name("http://example.com/files/384MB.jar"), "384MB.jar");
        assert_eq!(name("https://example.com/a/b/c.tar.gz?token=1#frag"), "c.tar.gz");
    }

    #[test]
    fn falls_back_when_path_ends_in_slash() {
        assert_eq!(name("http://example.com/"), "download.bin");
        assert_eq!(name("http://example.com/dir/"), "download.bin");
    }

    #[test]
    fn percent_encoded_separators_are_sanitized() {
        let n = name("http://example.com/evil%2F..%2Fname.txt");
        assert!(!n.contains('/'));
    }
}
