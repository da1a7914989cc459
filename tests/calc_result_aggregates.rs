#[path = "../src/calc.rs"]
mod calc;

use calc::{compute_result_aggregates, grade_for_gpa, percentage_string, round2, SubjectResult};

fn subject(name: &str, marks: f64, gpa: f64) -> SubjectResult {
    SubjectResult {
        subject: name.to_string(),
        marks,
        grade: grade_for_gpa(gpa).to_string(),
        gpa,
    }
}

#[test]
fn grade_bands_first_match_wins_high_to_low() {
    assert_eq!(grade_for_gpa(5.0), "A+");
    assert_eq!(grade_for_gpa(4.7), "A+");
    assert_eq!(grade_for_gpa(4.69), "A");
    assert_eq!(grade_for_gpa(4.0), "A");
    assert_eq!(grade_for_gpa(3.99), "A-");
    assert_eq!(grade_for_gpa(3.7), "A-");
    assert_eq!(grade_for_gpa(3.3), "B+");
    assert_eq!(grade_for_gpa(3.0), "B");
    assert_eq!(grade_for_gpa(2.7), "B-");
    assert_eq!(grade_for_gpa(2.3), "C+");
    assert_eq!(grade_for_gpa(2.0), "C");
    assert_eq!(grade_for_gpa(1.999), "C-");
    assert_eq!(grade_for_gpa(1.7), "C-");
    assert_eq!(grade_for_gpa(1.3), "D+");
    assert_eq!(grade_for_gpa(1.0), "D");
    assert_eq!(grade_for_gpa(0.999), "F");
    assert_eq!(grade_for_gpa(0.5), "F");
    assert_eq!(grade_for_gpa(0.0), "F");
}

#[test]
fn aggregates_are_sum_and_rounded_mean() {
    let subjects = vec![
        subject("Mathematics", 92.0, 5.0),
        subject("English", 71.0, 3.5),
        subject("Physics", 64.0, 3.0),
    ];
    let agg = compute_result_aggregates(&subjects).expect("aggregates");
    assert_eq!(agg.total_marks, 227.0);
    assert_eq!(agg.gpa, round2((5.0 + 3.5 + 3.0) / 3.0));
    assert_eq!(agg.gpa, 3.83);
    assert_eq!(agg.grade, "A-");
    assert!(agg.is_passed);
}

#[test]
fn pass_flag_tracks_the_two_point_oh_boundary() {
    let passing = compute_result_aggregates(&[subject("Math", 50.0, 2.0)]).expect("aggregates");
    assert!(passing.is_passed);
    assert_eq!(passing.grade, "C");

    let failing = compute_result_aggregates(&[subject("Math", 40.0, 1.99)]).expect("aggregates");
    assert!(!failing.is_passed);
}

#[test]
fn empty_subject_list_is_a_validation_error() {
    let e = compute_result_aggregates(&[]).expect_err("must reject empty list");
    assert_eq!(e.code, "bad_params");
}

#[test]
fn out_of_range_subjects_are_rejected() {
    let e = compute_result_aggregates(&[subject("Math", 101.0, 4.0)]).expect_err("marks > 100");
    assert_eq!(e.code, "bad_params");

    let e = compute_result_aggregates(&[subject("Math", 90.0, 5.5)]).expect_err("gpa > 5");
    assert_eq!(e.code, "bad_params");

    let e = compute_result_aggregates(&[subject("Math", -1.0, 4.0)]).expect_err("marks < 0");
    assert_eq!(e.code, "bad_params");

    let e = compute_result_aggregates(&[subject("   ", 90.0, 4.0)]).expect_err("blank subject");
    assert_eq!(e.code, "bad_params");
}

#[test]
fn percentages_render_fixed_two_decimals() {
    assert_eq!(percentage_string(6, 10), "60.00");
    assert_eq!(percentage_string(2, 10), "20.00");
    assert_eq!(percentage_string(1, 10), "10.00");
    assert_eq!(percentage_string(1, 3), "33.33");
    assert_eq!(percentage_string(10, 10), "100.00");
}

#[test]
fn zero_total_yields_literal_zero_string() {
    assert_eq!(percentage_string(0, 0), "0");
    assert_eq!(percentage_string(5, 0), "0");
}
