use std::collections::BTreeSet;

use log::debug;
use scraper::{Html, Selector};

use crate::engine::models::BuildFolder;
use crate::version::{Version, digit_runs};

/// Collect the build folders linked from an index page, ascending by version.
///
/// Links whose last path segment carries no digits fall back to the anchor
/// text. Listings that nest builds under a `10.0` prefix (for example
/// `10.0.26100.1742`) use the third and fourth numbers instead.
pub fn list_build_folders(html: &str) -> Vec<BuildFolder> {
    let document = Html::parse_document(html);
    let Some(selector) = anchor_selector() else {
        return Vec::new();
    };

    let mut folders: Vec<BuildFolder> = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href == "../" || href == "/" {
            continue;
        }

        let text: String;
        let mut runs = digit_runs(last_segment(href));
        if runs.is_empty() {
            text = anchor.text().collect::<String>();
            runs = digit_runs(text.trim());
        }
        let Some((major, minor)) = short_pair(&runs) else {
            continue;
        };

        let short_name = format!("{major}.{minor}");
        if folders.iter().any(|f| f.short_name == short_name) {
            continue;
        }
        debug!("index: build folder {short_name} from {href}");
        folders.push(BuildFolder {
            short_name,
            version: Version::new(vec![major, minor]),
        });
    }

    folders.sort_by(|a, b| a.version.cmp(&b.version));
    folders
}

/// Collect the decoded file names linked from a folder listing, skipping subfolders.
pub fn list_files(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Some(selector) = anchor_selector() else {
        return Vec::new();
    };

    let files: BTreeSet<String> = document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| !href.ends_with('/'))
        .map(|href| decode_name(href.rsplit('/').next().unwrap_or(href)))
        .filter(|name| !name.is_empty())
        .collect();
    files.into_iter().collect()
}

/// Percent-decode a path segment, keeping the raw text if it is not valid UTF-8.
pub fn decode_name(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_owned())
}

fn anchor_selector() -> Option<Selector> {
    Selector::parse("a[href]").ok()
}

fn last_segment(href: &str) -> &str {
    href.trim_end_matches('/').rsplit('/').next().unwrap_or(href)
}

fn short_pair(runs: &[&str]) -> Option<(u64, u64)> {
    if runs.len() < 2 {
        return None;
    }
    let (first, second) = if runs.len() >= 4 && runs[0] == "10" && runs[1] == "0" {
        (runs[2], runs[3])
    } else {
        (runs[0], runs[1])
    };
    Some((first.parse().ok()?, second.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(hrefs: &[&str]) -> String {
        let links: String = hrefs
            .iter()
            .map(|href| format!("<li><a href=\"{href}\">{href}</a></li>"))
            .collect();
        format!("<html><body><ul>{links}</ul></body></html>")
    }

    fn names(folders: &[BuildFolder]) -> Vec<&str> {
        folders.iter().map(|f| f.short_name.as_str()).collect()
    }

    #[test]
    fn lists_build_folders_sorted() {
        let html = page(&["../", "5.0/", "7.2/", "a/b/10.0/0.1/"]);
        let folders = list_build_folders(&html);
        assert_eq!(names(&folders), vec!["0.1", "5.0", "7.2"]);
    }

    #[test]
    fn unwraps_nested_ten_zero_prefix() {
        let html = page(&["/10.0.26100.1742/", "/26100.2000/"]);
        let folders = list_build_folders(&html);
        assert_eq!(names(&folders), vec!["26100.1742", "26100.2000"]);
    }

    #[test]
    fn sorts_numerically_not_lexically() {
        let html = page(&["26100.999/", "26100.1742/", "22621.4890/"]);
        let folders = list_build_folders(&html);
        assert_eq!(names(&folders), vec!["22621.4890", "26100.999", "26100.1742"]);
    }

    #[test]
    fn falls_back_to_anchor_text() {
        let html = r#"<a href="/folder-latest/">Build 26100.4061</a><a href="./misc/">misc</a>"#;
        let folders = list_build_folders(html);
        assert_eq!(names(&folders), vec!["26100.4061"]);
        assert_eq!(folders[0].version, Version::new(vec![26100, 4061]));
    }

    #[test]
    fn deduplicates_and_skips_single_numbers() {
        let html = page(&["26100.2000/", "/mirror/26100.2000/", "EP/", "2024/"]);
        let folders = list_build_folders(&html);
        assert_eq!(names(&folders), vec!["26100.2000"]);
    }

    #[test]
    fn empty_document_yields_no_folders() {
        assert!(list_build_folders("<html><body>nothing here</body></html>").is_empty());
        assert!(list_files("").is_empty());
    }

    #[test]
    fn lists_files_without_directories() {
        let html = page(&["a.cab", "b/", "A.CAB", "a.cab"]);
        assert_eq!(list_files(&html), vec!["A.CAB", "a.cab"]);
    }

    #[test]
    fn decodes_file_names() {
        let html = page(&[
            "/26100.2000/amd64/Windows11.0-KB5043080-x64%20(1).msu",
            "/26100.2000/amd64/SSU-26100.1738-x64.cab",
        ]);
        assert_eq!(
            list_files(&html),
            vec!["SSU-26100.1738-x64.cab", "Windows11.0-KB5043080-x64 (1).msu"]
        );
    }
}
