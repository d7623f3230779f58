use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Every available backend, results merged and deduplicated.
    #[default]
    Auto,
    /// Page text from the `pdf-extract` layout reader.
    Layout,
    /// Text rebuilt from content-stream text operators via `lopdf`.
    Stream,
}

impl ExtractionMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Layout => "layout",
            Self::Stream => "stream",
        }
    }
}

impl Display for ExtractionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "layout" => Ok(Self::Layout),
            "stream" => Ok(Self::Stream),
            other => Err(format!(
                "unknown extraction method '{other}', expected auto, layout or stream"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for ExtractionMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// 1-based page numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSelection {
    pages: BTreeSet<u32>,
}

impl PageSelection {
    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.iter().copied()
    }

    /// Builds a selection from explicit page numbers.
    ///
    /// # Errors
    /// Fails on page 0 or an empty list.
    pub fn from_pages(pages: impl IntoIterator<Item = u32>) -> Result<Self, String> {
        let pages = pages.into_iter().collect::<BTreeSet<_>>();
        if pages.contains(&0) {
            return Err("pages are 1-based".to_string());
        }
        if pages.is_empty() {
            return Err("page selection cannot be empty".to_string());
        }
        Ok(Self { pages })
    }
}

impl Display for PageSelection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .pages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

impl FromStr for PageSelection {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut pages = BTreeSet::new();
        for token in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some((start, end)) = token.split_once('-') {
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range start: '{start}'"))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range end: '{end}'"))?;
                if start == 0 || end == 0 {
                    return Err("pages are 1-based".to_string());
                }
                if end < start {
                    return Err(format!(
                        "invalid range '{token}': end is smaller than start"
                    ));
                }
                pages.extend(start..=end);
            } else {
                let page: u32 = token
                    .parse()
                    .map_err(|_| format!("invalid page number: '{token}'"))?;
                pages.insert(page);
            }
        }

        Self::from_pages(pages)
    }
}

impl<'de> Deserialize<'de> for PageSelection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PagesVisitor;

        impl<'de> Visitor<'de> for PagesVisitor {
            type Value = PageSelection;

            fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str("a page number, a list of page numbers or a string like \"1-3,5\"")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                let page = u32::try_from(value).map_err(E::custom)?;
                PageSelection::from_pages([page]).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                let page = u32::try_from(value).map_err(E::custom)?;
                PageSelection::from_pages([page]).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                value.parse().map_err(E::custom)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut pages = Vec::new();
                while let Some(page) = seq.next_element::<u32>()? {
                    pages.push(page);
                }
                PageSelection::from_pages(pages).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(PagesVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    AutoDetect,
    HasHeader,
    NoHeader,
}

/// Knobs shared by the text-based backends.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub header_mode: HeaderMode,
    /// Minimum cells a line needs to count as a table row.
    pub min_cols: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            header_mode: HeaderMode::AutoDetect,
            min_cols: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtractionMethod, PageSelection};
    use std::str::FromStr;

    #[test]
    fn parse_page_selection_range_and_single() {
        let selection = PageSelection::from_str("1-3,5").expect("selection should parse");
        assert!(selection.contains(1));
        assert!(selection.contains(2));
        assert!(selection.contains(3));
        assert!(selection.contains(5));
        assert!(!selection.contains(4));
        assert_eq!(selection.to_string(), "1,2,3,5");
    }

    #[test]
    fn reject_invalid_page_selection() {
        let err = PageSelection::from_str("3-1").expect_err("invalid range should fail");
        assert!(err.contains("invalid range"));
        let err = PageSelection::from_str("0").expect_err("page zero should fail");
        assert!(err.contains("1-based"));
    }

    #[test]
    fn pages_deserialize_from_scalar_list_and_string() {
        let single: PageSelection = serde_yaml::from_str("2").expect("int pages");
        let list: PageSelection = serde_yaml::from_str("[1, 3]").expect("list pages");
        let text: PageSelection = serde_yaml::from_str("\"1-2\"").expect("string pages");
        assert!(single.contains(2));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(text.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!("Layout".parse::<ExtractionMethod>(), Ok(ExtractionMethod::Layout));
        assert!("tabula".parse::<ExtractionMethod>().is_err());
    }
}
