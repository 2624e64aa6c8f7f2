use serde::{Deserialize, Serialize};

use super::page::Page;

/// Script-level failure attached to a whole run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
}

/// One line of script output with its offset from run start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    /// Milliseconds since the run started.
    pub time: i64,
    pub msg: String,
}

/// Aggregate of everything reconstructed for one run.
///
/// Pages are kept in insertion order. All concurrent access goes through
/// one exclusive lock over the whole graph (see `recorder::state`); this
/// type itself is plain data and serializes to a structured document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestResult {
    pub pages: Vec<Page>,
    pub output: Vec<OutputMessage>,

    /// Epoch milliseconds when the run began.
    pub start_time: Option<i64>,
    /// Total run time in milliseconds, including setup.
    pub run_time: i64,
    /// Portion of the run time spent on browser setup, in milliseconds.
    pub setup_time: i64,

    pub error: Option<TestError>,
    pub test_name: Option<String>,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub has_video: bool,
}

impl TestResult {
    #[must_use]
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: Some(test_name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Append a page, stamping it with the next sequential page id.
    /// Returns the page's index.
    pub fn add_page(&mut self, mut page: Page) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        {
            page.page_id = self.pages.len() as u32;
        }
        self.pages.push(page);
        self.pages.len() - 1
    }

    #[must_use]
    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    #[must_use]
    pub fn last_page(&self) -> Option<&Page> {
        self.pages.last()
    }

    pub fn last_page_mut(&mut self) -> Option<&mut Page> {
        self.pages.last_mut()
    }

    /// Record a line of script output, stamped relative to run start.
    pub fn add_output(&mut self, msg: impl Into<String>) {
        let time = self
            .start_time
            .map_or(0, |start| crate::timing::now_millis() - start);
        self.output.push(OutputMessage {
            time,
            msg: msg.into(),
        });
    }

    #[must_use]
    pub fn browser_version_major(&self) -> Option<u32> {
        self.browser_version
            .as_deref()?
            .split('.')
            .next()?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_ids_are_sequential() {
        let mut result = TestResult::default();
        result.add_page(Page::new());
        result.add_page(Page::new());
        result.add_page(Page::new());
        let ids: Vec<u32> = result.pages.iter().map(|p| p.page_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn success_until_error_set() {
        let mut result = TestResult::new("login");
        assert!(result.is_success());
        result.error = Some(TestError {
            message: "timed out".into(),
        });
        assert!(!result.is_success());
    }

    #[test]
    fn browser_version_major_parses() {
        let mut result = TestResult::default();
        result.browser_version = Some("124.0.6367.60".into());
        assert_eq!(result.browser_version_major(), Some(124));
        result.browser_version = Some("garbage".into());
        assert_eq!(result.browser_version_major(), None);
    }
}
