//! Aggregate statistics over a result table.

use crate::output::ResultRow;
use std::collections::HashMap;

/// Label distribution and most frequent tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStats {
    pub total: usize,
    pub yes: usize,
    pub no: usize,
    pub unknown: usize,
    /// `(tag, count)`, most frequent first
    pub top_tags: Vec<(String, usize)>,
}

impl ResultStats {
    /// Summarize rows, keeping the `limit` most frequent tags.
    pub fn from_rows(rows: &[ResultRow], limit: usize) -> Self {
        let mut stats = Self {
            total: rows.len(),
            ..Default::default()
        };
        let mut tag_counts: HashMap<&str, usize> = HashMap::new();

        for row in rows {
            match row.label.as_str() {
                "true" => stats.yes += 1,
                "false" => stats.no += 1,
                _ => stats.unknown += 1,
            }

            if row.detail.starts_with("error:") || row.detail == "no data" {
                continue;
            }
            for tag in row.detail.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                *tag_counts.entry(tag).or_default() += 1;
            }
        }

        let mut tags: Vec<(String, usize)> = tag_counts
            .into_iter()
            .map(|(tag, count)| (tag.to_string(), count))
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tags.truncate(limit);
        stats.top_tags = tags;

        stats
    }

    /// Share of `count` in the total, as a percentage.
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        count as f64 / self.total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: &str, detail: &str) -> ResultRow {
        ResultRow {
            job_id: "x".into(),
            source_reference: "https://t.me/x".into(),
            label: label.into(),
            detail: detail.into(),
        }
    }

    #[test]
    fn test_counts_labels_and_tags() {
        let rows = vec![
            row("true", "marketing, sales"),
            row("true", "marketing"),
            row("false", "memes"),
            row("unknown", "error: timed out"),
            row("unknown", "no data"),
        ];
        let stats = ResultStats::from_rows(&rows, 10);

        assert_eq!(stats.total, 5);
        assert_eq!((stats.yes, stats.no, stats.unknown), (2, 1, 2));
        assert_eq!(stats.top_tags[0], ("marketing".to_string(), 2));
        assert_eq!(stats.top_tags.len(), 3);
        assert!((stats.percent(2) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_tag_limit_and_empty_input() {
        let rows = vec![row("true", "a, b, c")];
        assert_eq!(ResultStats::from_rows(&rows, 2).top_tags.len(), 2);
        let empty = ResultStats::from_rows(&[], 10);
        assert_eq!(empty.total, 0);
        assert_eq!(empty.percent(0), 0.0);
    }
}
