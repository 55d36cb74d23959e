use anyhow::{Context, Result};
use std::path::Path;

/// Deterministically ordered, de-duplicated list of subjects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectRegistry {
    subjects: Vec<String>,
}

impl SubjectRegistry {
    pub fn new(subjects: impl IntoIterator<Item = String>) -> Self {
        let mut subjects: Vec<String> = subjects
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        subjects.sort();
        subjects.dedup();
        Self { subjects }
    }

    /// Merge an explicit list with the contents of a subjects file
    pub fn load(listed: &[String], file: Option<&Path>) -> Result<Self> {
        let mut all = listed.to_vec();
        if let Some(path) = file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading subjects file {}", path.display()))?;
            all.extend(parse_subjects(&text));
        }
        Ok(Self::new(all))
    }

    /// Registry containing only `subject`, whether or not it was listed
    pub fn single(subject: &str) -> Self {
        Self::new([subject.to_string()])
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// One subject per line; blank lines and `#` comments are ignored
pub fn parse_subjects(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_subjects_are_trimmed_sorted_and_unique() {
        let registry = SubjectRegistry::new(
            [" b@org ", "a@org", "", "b@org", "c@org"].map(String::from),
        );
        assert_eq!(registry.subjects(), ["a@org", "b@org", "c@org"].map(String::from));
    }

    #[test]
    fn test_parse_subjects_skips_comments() {
        let text = "# team\na@org\n\n  b@org  # on leave\n#c@org\n";
        assert_eq!(parse_subjects(text), vec!["a@org", "b@org"]);
    }

    #[test]
    fn test_load_merges_list_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "c@org\na@org").unwrap();

        let registry = SubjectRegistry::load(&["b@org".to_string(), "a@org".to_string()], Some(file.path()))
            .unwrap();

        assert_eq!(registry.subjects(), ["a@org", "b@org", "c@org"].map(String::from));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = SubjectRegistry::load(&[], Some(Path::new("/nonexistent/subjects.txt"))).unwrap_err();
        assert!(err.to_string().contains("subjects file"));
    }
}
