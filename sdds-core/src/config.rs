//! Decoder configuration.

/// Options that shape what a decode call returns.
///
/// ```
/// use sdds_core::DecoderConfig;
///
/// let config = DecoderConfig::new()
///     .with_columns(["time", "current"])
///     .with_max_pages(1);
/// assert_eq!(config.max_pages, Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Columns to keep; `None` keeps every declared column
    pub columns: Option<Vec<String>>,
    /// Stop after this many pages
    pub max_pages: Option<usize>,
}

impl DecoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only the named columns.
    ///
    /// Declaration order is preserved regardless of the order given here.
    /// Naming an undeclared column makes the decode fail with
    /// [`DecodeError::UnknownColumn`](crate::DecodeError::UnknownColumn).
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Returns true if the column should be kept in the result.
    pub fn keeps_column(&self, name: &str) -> bool {
        match &self.columns {
            Some(columns) => columns.iter().any(|c| c == name),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keeps_everything() {
        let config = DecoderConfig::new();
        assert!(config.keeps_column("anything"));
        assert_eq!(config.max_pages, None);
    }

    #[test]
    fn test_column_selection() {
        let config = DecoderConfig::new().with_columns(vec!["x".to_string()]);
        assert!(config.keeps_column("x"));
        assert!(!config.keeps_column("y"));
    }
}
