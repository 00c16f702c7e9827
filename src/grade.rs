use std::collections::HashMap;

/// One row of the active status catalog, ordered by descending point value.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDef {
    pub id: String,
    pub acronym: String,
    pub description: String,
    pub points: f64,
    pub visible: bool,
}

/// Weighted raw grade: each recorded status counts its point value once per
/// occurrence. Statuses missing from the catalog (soft-deleted after the
/// records were taken) contribute nothing.
pub fn user_grade(status_counts: &HashMap<String, i64>, statuses: &[StatusDef]) -> f64 {
    let mut sum = 0.0;
    for status in statuses {
        if let Some(count) = status_counts.get(&status.id) {
            sum += (*count as f64) * status.points;
        }
    }
    sum
}

/// Maximum achievable grade: every taken session scored at the single
/// highest-valued visible status. The catalog is sorted by points descending,
/// so that is the first visible entry. An empty visible catalog yields 0.
pub fn user_max_grade(taken_sessions: i64, statuses: &[StatusDef]) -> f64 {
    let top = statuses.iter().find(|s| s.visible).map(|s| s.points);
    match top {
        Some(points) => points * (taken_sessions as f64),
        None => 0.0,
    }
}

/// Normalized fraction in [0, 1]; exactly 0 when the max is 0 so a student
/// with no recorded sessions never divides by zero.
pub fn grade_fraction(grade: f64, max_grade: f64) -> f64 {
    if max_grade == 0.0 {
        0.0
    } else {
        grade / max_grade
    }
}

/// Serialized snapshot of the active catalog, recorded with every log write so
/// historical reports keep their relative weighting after catalog edits.
pub fn status_set_snapshot(statuses: &[StatusDef]) -> String {
    statuses
        .iter()
        .map(|s| s.acronym.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<StatusDef> {
        vec![
            StatusDef {
                id: "p".into(),
                acronym: "P".into(),
                description: "Present".into(),
                points: 2.0,
                visible: true,
            },
            StatusDef {
                id: "l".into(),
                acronym: "L".into(),
                description: "Late".into(),
                points: 1.0,
                visible: true,
            },
            StatusDef {
                id: "a".into(),
                acronym: "A".into(),
                description: "Absent".into(),
                points: 0.0,
                visible: true,
            },
        ]
    }

    #[test]
    fn weighted_sum_over_status_counts() {
        let statuses = catalog();
        let mut counts = HashMap::new();
        counts.insert("p".to_string(), 3);
        counts.insert("l".to_string(), 1);
        counts.insert("a".to_string(), 2);
        assert_eq!(user_grade(&counts, &statuses), 7.0);
    }

    #[test]
    fn counts_for_unknown_statuses_are_ignored() {
        let statuses = catalog();
        let mut counts = HashMap::new();
        counts.insert("p".to_string(), 1);
        counts.insert("gone".to_string(), 5);
        assert_eq!(user_grade(&counts, &statuses), 2.0);
    }

    #[test]
    fn max_grade_uses_highest_visible_status() {
        let mut statuses = catalog();
        assert_eq!(user_max_grade(4, &statuses), 8.0);

        // Hiding the top status demotes the per-session maximum.
        statuses[0].visible = false;
        assert_eq!(user_max_grade(4, &statuses), 4.0);
    }

    #[test]
    fn max_grade_is_zero_without_visible_statuses() {
        let mut statuses = catalog();
        for s in &mut statuses {
            s.visible = false;
        }
        assert_eq!(user_max_grade(4, &statuses), 0.0);
        assert_eq!(user_max_grade(0, &catalog()), 0.0);
    }

    #[test]
    fn fraction_is_zero_when_max_is_zero() {
        assert_eq!(grade_fraction(0.0, 0.0), 0.0);
        assert_eq!(grade_fraction(5.0, 0.0), 0.0);
        assert_eq!(grade_fraction(3.0, 6.0), 0.5);
    }

    #[test]
    fn snapshot_joins_acronyms_in_catalog_order() {
        assert_eq!(status_set_snapshot(&catalog()), "P,L,A");
        assert_eq!(status_set_snapshot(&[]), "");
    }
}
