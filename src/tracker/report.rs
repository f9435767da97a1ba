//! Session summary derived from the mistake tracker's state.
//!
//! Building a report never mutates the session and never reads the clock,
//! so the same session state always yields the same report.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::tracker::angles::Joint;
use crate::tracker::mistakes::{ErrorEntry, Session};

/// Top joint share above which errors count as concentrated (percent)
const CONSISTENCY_THRESHOLD: u64 = 40;
const SECONDARY_FOCUS_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Perfect,
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

/// (grade, average error below, max major errors); strictest first
const GRADE_TABLE: [(Grade, f32, Option<usize>); 5] = [
    (Grade::APlus, 8.0, Some(2)),
    (Grade::A, 10.0, Some(5)),
    (Grade::B, 15.0, Some(10)),
    (Grade::C, 20.0, Some(20)),
    (Grade::D, 25.0, None),
];

impl Grade {
    pub fn from_stats(average_error: f32, major_errors: usize) -> Self {
        GRADE_TABLE
            .iter()
            .find(|(_, max_avg, max_major)| {
                average_error < *max_avg && max_major.map_or(true, |m| major_errors <= m)
            })
            .map(|(grade, _, _)| *grade)
            .unwrap_or(Grade::F)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Perfect => "Perfect",
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Grade::Perfect => "No mistakes recorded. Keep it up!",
            Grade::APlus => "Outstanding performance, nearly flawless.",
            Grade::A => "Excellent work with only minor deviations.",
            Grade::B => "Good performance, a few movements need polish.",
            Grade::C => "Decent effort, several joints need practice.",
            Grade::D => "Keep practicing, focus on the highlighted joints.",
            Grade::F => "Slow down and rehearse the routine section by section.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Important,
    Critical,
}

impl Severity {
    pub fn from_magnitude(magnitude: f32) -> Self {
        if magnitude >= 25.0 {
            Severity::Critical
        } else if magnitude >= 15.0 {
            Severity::Important
        } else {
            Severity::Minor
        }
    }
}

/// 関節と重大度に応じた改善アドバイス
pub fn suggestion(joint: Joint, severity: Severity) -> String {
    let side = if joint.name().starts_with("left") { "left" } else { "right" };
    let tip = match joint {
        Joint::LeftElbow | Joint::RightElbow => {
            format!("match the bend of your {} arm to the reference", side)
        }
        Joint::LeftKnee | Joint::RightKnee => {
            format!("watch how deep your {} knee bends", side)
        }
        Joint::LeftShoulder | Joint::RightShoulder => {
            format!("raise or lower your {} arm from the shoulder", side)
        }
        Joint::LeftHip | Joint::RightHip => {
            format!("keep your {} leg at the right angle from the hip", side)
        }
    };
    let prefix = match severity {
        Severity::Critical => "Major correction needed",
        Severity::Important => "Noticeable deviation",
        Severity::Minor => "Small adjustment",
    };
    format!("{}: {}", prefix, tip)
}

/// 秒 -> "MM:SS.s"
pub fn format_time(seconds: f64) -> String {
    let tenths = (seconds.max(0.0) * 10.0).round() as u64;
    let minutes = tenths / 600;
    let rest = (tenths % 600) as f64 / 10.0;
    format!("{:02}:{:04.1}", minutes, rest)
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequentMistake {
    pub joint: Joint,
    pub count: u64,
    /// share of all logged errors (percent)
    pub percentage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorstMoment {
    pub joint: Joint,
    pub magnitude: f32,
    pub timestamp: f64,
    /// "MM:SS.s"
    pub time: String,
    pub sequence: u64,
    pub screenshot: String,
    pub severity: Severity,
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImprovementPlan {
    pub primary_focus: Option<Joint>,
    pub secondary_focus: Vec<Joint>,
    pub worst_moment: Option<String>,
    pub consistency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub session_id: String,
    pub total_errors: u64,
    pub major_errors: usize,
    /// mean magnitude over the retained history
    pub average_error: f32,
    pub grade: Grade,
    pub message: String,
    pub frequent_mistakes: Vec<FrequentMistake>,
    pub worst_moments: Vec<WorstMoment>,
    pub improvement_plan: ImprovementPlan,
    pub screenshots: Vec<String>,
}

impl Report {
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            total_errors: 0,
            major_errors: 0,
            average_error: 0.0,
            grade: Grade::Perfect,
            message: Grade::Perfect.message().to_string(),
            frequent_mistakes: Vec::new(),
            worst_moments: Vec::new(),
            improvement_plan: ImprovementPlan {
                consistency: "No errors to analyse.".to_string(),
                ..Default::default()
            },
            screenshots: Vec::new(),
        }
    }
}

fn frequent_mistakes(session: &Session, top_n: usize) -> Vec<FrequentMistake> {
    let total = session.total_errors();
    let mut ranked: Vec<(Joint, u64)> = session
        .counts
        .iter()
        .filter(|(_, &count)| count > 0)
        .map(|(&joint, &count)| (joint, count))
        .collect();
    // BTreeMap order is joint order, so a stable sort keeps the tie-break
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(joint, count)| FrequentMistake {
            joint,
            count,
            percentage: round1(count as f32 / total as f32 * 100.0),
        })
        .collect()
}

fn worst_order(a: &ErrorEntry, b: &ErrorEntry) -> Ordering {
    b.magnitude
        .total_cmp(&a.magnitude)
        .then_with(|| a.timestamp.total_cmp(&b.timestamp))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

fn worst_moments(session: &Session, top_n: usize) -> Vec<WorstMoment> {
    let mut with_shots: Vec<&ErrorEntry> = session
        .major_errors
        .iter()
        .filter(|e| e.screenshot.is_some())
        .collect();
    with_shots.sort_by(|a, b| worst_order(a, b));
    with_shots
        .into_iter()
        .take(top_n)
        .filter_map(|e| {
            let screenshot = e.screenshot.clone()?;
            let severity = Severity::from_magnitude(e.magnitude);
            Some(WorstMoment {
                joint: e.joint,
                magnitude: round1(e.magnitude),
                timestamp: e.timestamp,
                time: format_time(e.timestamp),
                sequence: e.sequence,
                screenshot,
                severity,
                suggestion: suggestion(e.joint, severity),
            })
        })
        .collect()
}

fn improvement_plan(
    frequent: &[FrequentMistake],
    worst: &[WorstMoment],
    total_errors: u64,
) -> ImprovementPlan {
    let primary = frequent.first();
    // 丸め前の件数で判定
    let consistency = match primary {
        Some(top) if top.count * 100 > CONSISTENCY_THRESHOLD * total_errors => format!(
            "Errors concentrate on the {} ({:.0}% of all mistakes); drilling it will help most.",
            top.joint.label(),
            top.percentage
        ),
        Some(_) => "Errors are spread across several joints; work on overall consistency.".to_string(),
        None => "No errors to analyse.".to_string(),
    };
    ImprovementPlan {
        primary_focus: primary.map(|m| m.joint),
        secondary_focus: frequent
            .iter()
            .skip(1)
            .take(SECONDARY_FOCUS_COUNT)
            .map(|m| m.joint)
            .collect(),
        worst_moment: worst.first().map(|w| {
            format!(
                "At {} the {} was off by {:.1} degrees. {}",
                w.time,
                w.joint.label(),
                w.magnitude,
                w.suggestion
            )
        }),
        consistency,
    }
}

/// セッション状態からレポートを生成
pub fn build_report(session: &Session, top_n: usize) -> Report {
    let total_errors = session.total_errors();
    if total_errors == 0 {
        return Report::empty(&session.id);
    }

    let average_error = if session.history.is_empty() {
        0.0
    } else {
        let sum: f32 = session.history.iter().map(|e| e.magnitude).sum();
        round1(sum / session.history.len() as f32)
    };
    let major_errors = session.major_errors.len();
    let grade = Grade::from_stats(average_error, major_errors);

    let frequent = frequent_mistakes(session, top_n);
    let worst = worst_moments(session, top_n);
    let improvement_plan = improvement_plan(&frequent, &worst, total_errors);

    Report {
        session_id: session.id.clone(),
        total_errors,
        major_errors,
        average_error,
        grade,
        message: grade.message().to_string(),
        frequent_mistakes: frequent,
        worst_moments: worst,
        improvement_plan,
        screenshots: session
            .major_errors
            .iter()
            .filter_map(|e| e.screenshot.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(joint: Joint, magnitude: f32, timestamp: f64, sequence: u64, shot: bool) -> ErrorEntry {
        ErrorEntry {
            joint,
            magnitude,
            timestamp,
            sequence,
            screenshot: shot.then(|| format!("s_f{}_{}.jpg", sequence, joint.name())),
        }
    }

    fn session_with(entries: &[ErrorEntry], major_threshold: f32) -> Session {
        let mut session = Session::new(100);
        for e in entries {
            session.record(e.clone(), e.magnitude > major_threshold);
        }
        session
    }

    #[test]
    fn test_grade_table() {
        assert_eq!(Grade::from_stats(7.9, 2), Grade::APlus);
        assert_eq!(Grade::from_stats(7.9, 3), Grade::A);
        assert_eq!(Grade::from_stats(8.0, 0), Grade::A);
        assert_eq!(Grade::from_stats(9.0, 6), Grade::B);
        assert_eq!(Grade::from_stats(14.9, 10), Grade::B);
        assert_eq!(Grade::from_stats(15.0, 10), Grade::C);
        assert_eq!(Grade::from_stats(12.0, 21), Grade::D);
        assert_eq!(Grade::from_stats(24.9, 500), Grade::D);
        assert_eq!(Grade::from_stats(25.0, 0), Grade::F);
    }

    #[test]
    fn test_grade_serializes_with_plus() {
        assert_eq!(serde_json::to_string(&Grade::APlus).unwrap(), "\"A+\"");
        assert_eq!(Grade::APlus.as_str(), "A+");
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(Severity::from_magnitude(14.9), Severity::Minor);
        assert_eq!(Severity::from_magnitude(15.0), Severity::Important);
        assert_eq!(Severity::from_magnitude(24.9), Severity::Important);
        assert_eq!(Severity::from_magnitude(25.0), Severity::Critical);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00.0");
        assert_eq!(format_time(5.25), "00:05.3");
        assert_eq!(format_time(65.0), "01:05.0");
        assert_eq!(format_time(59.97), "01:00.0");
        assert_eq!(format_time(-1.0), "00:00.0");
    }

    #[test]
    fn test_suggestion_mentions_side() {
        let s = suggestion(Joint::RightKnee, Severity::Critical);
        assert!(s.starts_with("Major correction needed"));
        assert!(s.contains("right knee"));
    }

    #[test]
    fn test_empty_session_is_perfect() {
        let session = Session::new(10);
        let report = build_report(&session, 10);
        assert_eq!(report.grade, Grade::Perfect);
        assert_eq!(report.total_errors, 0);
        assert!(report.frequent_mistakes.is_empty());
        assert!(report.worst_moments.is_empty());
        assert!(report.improvement_plan.primary_focus.is_none());
    }

    #[test]
    fn test_frequent_ranking_and_ties() {
        let session = session_with(
            &[
                entry(Joint::RightHip, 6.0, 0.1, 1, false),
                entry(Joint::LeftKnee, 6.0, 0.2, 2, false),
                entry(Joint::LeftKnee, 6.0, 0.3, 3, false),
                entry(Joint::RightElbow, 6.0, 0.4, 4, false),
            ],
            15.0,
        );
        let report = build_report(&session, 10);
        let joints: Vec<Joint> = report.frequent_mistakes.iter().map(|m| m.joint).collect();
        // right_elbow precedes right_hip in joint order
        assert_eq!(joints, vec![Joint::LeftKnee, Joint::RightElbow, Joint::RightHip]);
        assert_eq!(report.frequent_mistakes[0].percentage, 50.0);
        assert_eq!(report.frequent_mistakes[1].percentage, 25.0);
    }

    #[test]
    fn test_top_n_limits() {
        let entries: Vec<ErrorEntry> = Joint::ALL
            .iter()
            .enumerate()
            .map(|(i, &j)| entry(j, 20.0 + i as f32, i as f64, i as u64, true))
            .collect();
        let report = build_report(&session_with(&entries, 15.0), 3);
        assert_eq!(report.frequent_mistakes.len(), 3);
        assert_eq!(report.worst_moments.len(), 3);
        assert_eq!(report.screenshots.len(), Joint::ALL.len());
        assert_eq!(report.improvement_plan.secondary_focus.len(), 2);
    }

    #[test]
    fn test_worst_moment_ordering() {
        let session = session_with(
            &[
                entry(Joint::LeftElbow, 20.0, 3.0, 30, true),
                entry(Joint::LeftKnee, 20.0, 1.0, 10, true),
                entry(Joint::RightHip, 26.0, 9.0, 90, true),
                entry(Joint::LeftHip, 20.0, 1.0, 5, true),
                entry(Joint::RightKnee, 40.0, 2.0, 20, false),
            ],
            15.0,
        );
        let report = build_report(&session, 10);
        let order: Vec<u64> = report.worst_moments.iter().map(|w| w.sequence).collect();
        assert_eq!(order, vec![90, 5, 10, 30]);
        assert_eq!(report.worst_moments[0].severity, Severity::Critical);
        assert_eq!(report.worst_moments[1].time, "00:01.0");
    }

    #[test]
    fn test_consistency_remark() {
        let concentrated = session_with(
            &[
                entry(Joint::LeftElbow, 6.0, 0.0, 1, false),
                entry(Joint::LeftElbow, 6.0, 0.0, 2, false),
                entry(Joint::LeftKnee, 6.0, 0.0, 3, false),
            ],
            15.0,
        );
        let plan = build_report(&concentrated, 10).improvement_plan;
        assert_eq!(plan.primary_focus, Some(Joint::LeftElbow));
        assert!(plan.consistency.contains("concentrate"));

        let spread = session_with(
            &[
                entry(Joint::LeftElbow, 6.0, 0.0, 1, false),
                entry(Joint::LeftKnee, 6.0, 0.0, 2, false),
                entry(Joint::RightKnee, 6.0, 0.0, 3, false),
            ],
            15.0,
        );
        let plan = build_report(&spread, 10).improvement_plan;
        assert!(plan.consistency.contains("spread"));
        assert!(plan.worst_moment.is_none());
    }

    #[test]
    fn test_consistency_threshold_uses_raw_share() {
        let with_counts = |counts: &[(Joint, u64)]| {
            let mut session = Session::new(100);
            session.counts = counts.iter().copied().collect();
            session
        };

        // 2001 / 5000 = 40.02%, shown as 40.0
        let above = with_counts(&[
            (Joint::LeftElbow, 2001),
            (Joint::LeftKnee, 1000),
            (Joint::RightKnee, 1000),
            (Joint::RightElbow, 999),
        ]);
        let report = build_report(&above, 10);
        assert_eq!(report.frequent_mistakes[0].percentage, 40.0);
        assert!(report.improvement_plan.consistency.contains("concentrate"));

        let exact = with_counts(&[
            (Joint::LeftElbow, 2000),
            (Joint::LeftKnee, 1000),
            (Joint::RightKnee, 1000),
            (Joint::RightElbow, 1000),
        ]);
        let plan = build_report(&exact, 10).improvement_plan;
        assert_eq!(plan.primary_focus, Some(Joint::LeftElbow));
        assert!(plan.consistency.contains("spread"));
    }

    #[test]
    fn test_report_is_deterministic() {
        let session = session_with(
            &[
                entry(Joint::LeftElbow, 20.0, 1.5, 3, true),
                entry(Joint::RightKnee, 8.0, 2.5, 4, false),
            ],
            15.0,
        );
        assert_eq!(build_report(&session, 10), build_report(&session, 10));
    }
}
