//! Reload marker carried in the page URL's query string.

use url::Url;

const MARKER_VALUE: &str = "true";

/// Query-parameter flag marking a load that is itself an activation reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadMarker {
    param: String,
}

impl ReloadMarker {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }

    pub fn is_set(&self, url: &Url) -> bool {
        let flag = format!("{}={MARKER_VALUE}", self.param);
        segments(url).any(|segment| segment == flag)
    }

    /// Returns `url` carrying exactly one `param=true` pair.
    pub fn set(&self, url: &Url) -> Url {
        let flag = format!("{}={MARKER_VALUE}", self.param);
        let mut kept = self.kept_segments(url);
        kept.push(&flag);

        let mut marked = url.clone();
        marked.set_query(Some(&kept.join("&")));
        marked
    }

    /// Returns `url` without the marker, or `None` when it carries none.
    pub fn clear(&self, url: &Url) -> Option<Url> {
        if !segments(url).any(|segment| self.names_marker(segment)) {
            return None;
        }

        let kept = self.kept_segments(url);
        let mut stripped = url.clone();
        if kept.is_empty() {
            stripped.set_query(None);
        } else {
            stripped.set_query(Some(&kept.join("&")));
        }
        Some(stripped)
    }

    /// Raw query segments other than the marker, as the page wrote them.
    fn kept_segments<'u>(&self, url: &'u Url) -> Vec<&'u str> {
        segments(url)
            .filter(|segment| !self.names_marker(segment))
            .collect()
    }

    fn names_marker(&self, segment: &str) -> bool {
        let name = segment.split_once('=').map_or(segment, |(name, _)| name);
        name == self.param
    }
}

fn segments(url: &Url) -> impl Iterator<Item = &str> {
    url.query()
        .filter(|query| !query.is_empty())
        .into_iter()
        .flat_map(|query| query.split('&'))
}
