use serde::Serialize;
use std::collections::BTreeSet;

/// Reference entities compared with the entities a dataset actually holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageAudit {
    /// In the reference list but absent from the dataset, excluding
    /// entities known to be absent.
    pub missing: BTreeSet<String>,
    /// In the dataset but not in the reference list.
    pub unexpected_present: BTreeSet<String>,
    pub reference_count: usize,
    pub dataset_count: usize,
}

impl CoverageAudit {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Share of expected reference entities present in the dataset.
    pub fn coverage_ratio(&self) -> f64 {
        let expected = self.reference_count;
        if expected == 0 {
            return 1.0;
        }
        (expected - self.missing.len().min(expected)) as f64 / expected as f64
    }
}

pub fn audit_coverage<'a, R, D>(
    reference_ids: R,
    dataset_ids: D,
    expected_absent: &BTreeSet<String>,
) -> CoverageAudit
where
    R: IntoIterator<Item = &'a str>,
    D: IntoIterator<Item = &'a str>,
{
    let reference: BTreeSet<&str> = reference_ids.into_iter().collect();
    let dataset: BTreeSet<&str> = dataset_ids.into_iter().collect();
    CoverageAudit {
        missing: reference
            .difference(&dataset)
            .filter(|id| !expected_absent.contains(**id))
            .map(|id| id.to_string())
            .collect(),
        unexpected_present: dataset
            .difference(&reference)
            .map(|id| id.to_string())
            .collect(),
        reference_count: reference.len(),
        dataset_count: dataset.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_separates_missing_and_unexpected() {
        let absent = BTreeSet::from(["51001".to_string()]);
        let audit = audit_coverage(
            ["08019", "28079", "51001", "52001"],
            ["08019", "28079", "99999"],
            &absent,
        );
        assert_eq!(audit.missing, BTreeSet::from(["52001".to_string()]));
        assert_eq!(audit.unexpected_present, BTreeSet::from(["99999".to_string()]));
        assert_eq!(audit.reference_count, 4);
        assert_eq!(audit.dataset_count, 3);
        assert!(!audit.is_complete());
        assert!((audit.coverage_ratio() - 0.75).abs() < 1e-9);
    }
}
