use std::collections::HashSet;

/// Decides which filesystem entries take part in a snapshot.
///
/// Matching is on the entry's base name only. The same filter drives both
/// the archive walk and the fingerprint walk, so the recorded metadata always
/// describes the archived file set.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    ignored: HashSet<String>,
}

impl PathFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn included(&self, base_name: &str) -> bool {
        !self.ignored.contains(base_name)
    }

    pub fn ignored_count(&self) -> usize {
        self.ignored.len()
    }
}
