use serde::{Deserialize, Serialize};

/// 2-decimal rounding used for every derived aggregate (GPA, percentages).
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub const PASS_GPA: f64 = 2.0;

pub const ATTENDANCE_STATUSES: [&str; 4] = ["present", "absent", "late", "leave"];

pub fn is_attendance_status(s: &str) -> bool {
    ATTENDANCE_STATUSES.contains(&s)
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// One row of the caller-supplied subject list. The per-subject letter grade
/// is recorded verbatim; only the overall aggregates are server-derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject: String,
    pub marks: f64,
    pub grade: String,
    pub gpa: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultAggregates {
    pub total_marks: f64,
    pub gpa: f64,
    pub grade: &'static str,
    pub is_passed: bool,
}

/// Descending-threshold bands, first match wins.
pub fn grade_for_gpa(gpa: f64) -> &'static str {
    if gpa >= 4.7 {
        "A+"
    } else if gpa >= 4.0 {
        "A"
    } else if gpa >= 3.7 {
        "A-"
    } else if gpa >= 3.3 {
        "B+"
    } else if gpa >= 3.0 {
        "B"
    } else if gpa >= 2.7 {
        "B-"
    } else if gpa >= 2.3 {
        "C+"
    } else if gpa >= 2.0 {
        "C"
    } else if gpa >= 1.7 {
        "C-"
    } else if gpa >= 1.3 {
        "D+"
    } else if gpa >= 1.0 {
        "D"
    } else {
        "F"
    }
}

/// Derives total marks, mean GPA, the overall letter grade and the pass flag
/// from the subject list. This is the only code path that produces these four
/// fields; caller-supplied values for them are never persisted. An empty
/// subject list is a validation error, not a mean over zero elements.
pub fn compute_result_aggregates(
    subjects: &[SubjectResult],
) -> Result<ResultAggregates, CalcError> {
    if subjects.is_empty() {
        return Err(CalcError::new(
            "bad_params",
            "results must contain at least one subject result",
        ));
    }
    for s in subjects {
        if s.subject.trim().is_empty() {
            return Err(CalcError::new(
                "bad_params",
                "subject name must not be empty",
            ));
        }
        if !(0.0..=100.0).contains(&s.marks) {
            return Err(CalcError::new(
                "bad_params",
                format!("marks for {} must be between 0 and 100", s.subject),
            ));
        }
        if !(0.0..=5.0).contains(&s.gpa) {
            return Err(CalcError::new(
                "bad_params",
                format!("gpa for {} must be between 0 and 5", s.subject),
            ));
        }
    }

    let total_marks: f64 = subjects.iter().map(|s| s.marks).sum();
    let gpa = round2(subjects.iter().map(|s| s.gpa).sum::<f64>() / subjects.len() as f64);
    let grade = grade_for_gpa(gpa);

    Ok(ResultAggregates {
        total_marks,
        gpa,
        grade,
        is_passed: gpa >= PASS_GPA,
    })
}

/// Percentage of `count` over `total` as a fixed 2-decimal string. A zero
/// total yields the literal "0" rather than a division error.
pub fn percentage_string(count: i64, total: i64) -> String {
    if total == 0 {
        return "0".to_string();
    }
    format!("{:.2}", round2(count as f64 * 100.0 / total as f64))
}
