use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{CourseStatus, Enrollment, PlannedAction};
use crate::policy;
use crate::scheduler::{Eligibility, FailureKind, RunSummary};

/// Aggregates enrollments per eligible course using the same rules the
/// scheduler applies, so the counts predict what `run` would do at `now`.
pub fn summarize_courses(
    eligible: &Eligibility,
    enrollments: &[Enrollment],
    now: DateTime<Utc>,
) -> (Vec<CourseStatus>, Vec<PlannedAction>) {
    let mut statuses: BTreeMap<&str, CourseStatus> = eligible
        .courses
        .values()
        .map(|course| {
            (
                course.id.as_str(),
                CourseStatus {
                    course_id: course.id.clone(),
                    course_name: course.display_name.clone(),
                    ..CourseStatus::default()
                },
            )
        })
        .collect();
    let mut actions = Vec::new();

    for enrollment in enrollments.iter().filter(|e| e.is_active) {
        let (Some(course), Some(status)) = (
            eligible.courses.get(&enrollment.course_id),
            statuses.get_mut(enrollment.course_id.as_str()),
        ) else {
            continue;
        };
        status.active += 1;
        if enrollment.is_completed() {
            status.completed += 1;
        } else {
            status.incomplete += 1;
        }

        match enrollment.completed_at {
            Some(completed_at) => {
                if let Some(elapsed) = policy::re_enrollment_due(&course.policy, completed_at, now)
                {
                    status.re_enrollments_due += 1;
                    actions.push(PlannedAction {
                        learner_name: enrollment.learner_name.clone(),
                        learner_email: enrollment.learner_email.clone(),
                        course_id: course.id.clone(),
                        description: format!(
                            "re-enroll ({elapsed} {}s since completion)",
                            course.policy.re_enroll_unit
                        ),
                    });
                }
            }
            None => {
                let elapsed = policy::elapsed_days(enrollment.created_at, now);
                if policy::is_overdue(&course.policy, elapsed) {
                    status.overdue += 1;
                }
                if let Some(due) = policy::reminder_due(&course.policy, elapsed) {
                    status.reminders_due += 1;
                    let description = if due.overdue {
                        format!("overdue reminder ({} days over)", due.days_delta)
                    } else {
                        format!("reminder ({} days left)", due.days_delta)
                    };
                    actions.push(PlannedAction {
                        learner_name: enrollment.learner_name.clone(),
                        learner_email: enrollment.learner_email.clone(),
                        course_id: course.id.clone(),
                        description,
                    });
                }
            }
        }
    }

    let mut statuses: Vec<CourseStatus> = statuses.into_values().collect();
    statuses.sort_by(|a, b| b.overdue.cmp(&a.overdue).then(a.course_id.cmp(&b.course_id)));
    (statuses, actions)
}

pub fn build_report(
    course: Option<&str>,
    now: DateTime<Utc>,
    statuses: &[CourseStatus],
    actions: &[PlannedAction],
    eligible: &Eligibility,
) -> String {
    let mut output = String::new();
    let scope = course.unwrap_or("all eligible courses");

    let _ = writeln!(output, "# Enrollment Lifecycle Report");
    let _ = writeln!(output, "Generated for {} at {}", scope, now.to_rfc3339());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Course Status");

    if statuses.is_empty() {
        let _ = writeln!(output, "No eligible courses.");
    } else {
        for status in statuses {
            let _ = writeln!(
                output,
                "- {} ({}): {} active, {} completed, {} in progress, {} overdue",
                status.course_name,
                status.course_id,
                status.active,
                status.completed,
                status.incomplete,
                status.overdue
            );
            let _ = writeln!(
                output,
                "  - due today: {} reminders, {} re-enrollments",
                status.reminders_due, status.re_enrollments_due
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Next Actions");

    if actions.is_empty() {
        let _ = writeln!(output, "Nothing due today.");
    } else {
        for action in actions.iter().take(25) {
            let _ = writeln!(
                output,
                "- {} ({}) in {}: {}",
                action.learner_name, action.learner_email, action.course_id, action.description
            );
        }
        if actions.len() > 25 {
            let _ = writeln!(output, "- ... and {} more", actions.len() - 25);
        }
    }

    if !eligible.failures.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Skipped Courses");
        for failure in &eligible.failures {
            let _ = writeln!(output, "- {}: {}", failure.course_id, failure.message);
        }
    }

    output
}

pub fn build_run_report(now: DateTime<Utc>, summary: &RunSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Lifecycle Run {}", now.to_rfc3339());
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "- Courses evaluated: {} ({} skipped)",
        summary.courses_eligible, summary.courses_skipped
    );
    let _ = writeln!(
        output,
        "- Re-enrollments: {} ({} progress records cleared, {} already restarted)",
        summary.re_enrollments, summary.progress_deleted, summary.re_enrollments_stale
    );
    let _ = writeln!(output, "- Reminders due: {}", summary.reminders_due);
    let _ = writeln!(
        output,
        "- Emails delivered: {} of {}",
        summary.notifications_sent,
        summary.emitted.len()
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Failures");

    if summary.failures.is_empty() {
        let _ = writeln!(output, "None.");
    } else {
        for failure in &summary.failures {
            let kind = match failure.kind {
                FailureKind::PolicyLookup => "policy",
                FailureKind::Persistence => "persistence",
                FailureKind::Dispatch => "dispatch",
            };
            let target = failure
                .enrollment_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| failure.course_id.clone());
            let _ = writeln!(output, "- [{}] {}: {}", kind, target, failure.message);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::{Duration, Months, TimeZone};
    use uuid::Uuid;

    use crate::models::{Course, CoursePolicy, ReEnrollUnit};
    use crate::scheduler::ItemFailure;

    const SAFETY: &str = "course-v1:GS+SAFE101+2026";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).unwrap()
    }

    fn eligibility() -> Eligibility {
        let mut eligible = Eligibility::default();
        eligible.courses.insert(
            SAFETY.to_string(),
            Course {
                id: SAFETY.to_string(),
                display_name: "Lab Safety Essentials".to_string(),
                end: None,
                policy: CoursePolicy {
                    finish_days: Some(30),
                    reminder_days: BTreeSet::from([10, 20, 30]),
                    re_enroll_interval: Some(12),
                    re_enroll_unit: ReEnrollUnit::Month,
                    ..CoursePolicy::default()
                },
            },
        );
        eligible
    }

    fn enrollment(
        name: &str,
        course_id: &str,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            learner_id: Uuid::new_v4(),
            learner_name: name.to_string(),
            learner_email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            language: None,
            course_id: course_id.to_string(),
            is_active: true,
            created_at,
            completed_at,
        }
    }

    fn sample_enrollments() -> Vec<Enrollment> {
        let thirteen_months = now().checked_sub_months(Months::new(13)).unwrap();
        vec![
            enrollment("Avery Lee", SAFETY, now() - Duration::days(20), None),
            enrollment("Jules Moreno", SAFETY, now() - Duration::days(40), None),
            enrollment(
                "Kiara Patel",
                SAFETY,
                thirteen_months - Duration::days(10),
                Some(thirteen_months),
            ),
            enrollment("Dana Cho", "course-v1:GS+OTHER+2026", now(), None),
        ]
    }

    #[test]
    fn counts_follow_scheduler_rules() {
        let (statuses, actions) = summarize_courses(&eligibility(), &sample_enrollments(), now());

        assert_eq!(statuses.len(), 1);
        let status = &statuses[0];
        assert_eq!(status.active, 3);
        assert_eq!(status.completed, 1);
        assert_eq!(status.incomplete, 2);
        assert_eq!(status.overdue, 1);
        assert_eq!(status.reminders_due, 1);
        assert_eq!(status.re_enrollments_due, 1);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn report_lists_statuses_and_actions() {
        let eligible = eligibility();
        let (statuses, actions) = summarize_courses(&eligible, &sample_enrollments(), now());
        let report = build_report(None, now(), &statuses, &actions, &eligible);

        assert!(report.contains("# Enrollment Lifecycle Report"));
        assert!(report.contains("Lab Safety Essentials (course-v1:GS+SAFE101+2026): 3 active"));
        assert!(report.contains("Avery Lee (avery.lee@example.com) in course-v1:GS+SAFE101+2026: reminder (10 days left)"));
        assert!(report.contains("re-enroll (13 months since completion)"));
        assert!(!report.contains("## Skipped Courses"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(Some(SAFETY), now(), &[], &[], &Eligibility::default());
        assert!(report.contains("Generated for course-v1:GS+SAFE101+2026"));
        assert!(report.contains("No eligible courses."));
        assert!(report.contains("Nothing due today."));
    }

    #[test]
    fn run_report_lists_failures() {
        let summary = RunSummary {
            courses_eligible: 2,
            courses_skipped: 1,
            failures: vec![ItemFailure {
                kind: FailureKind::PolicyLookup,
                course_id: "course-v1:GS+ETH201+2026".to_string(),
                enrollment_id: None,
                message: "course course-v1:GS+ETH201+2026 not found".to_string(),
            }],
            ..RunSummary::default()
        };

        let report = build_run_report(now(), &summary);
        assert!(report.contains("- Courses evaluated: 2 (1 skipped)"));
        assert!(report.contains("- Re-enrollments: 0 (0 progress records cleared, 0 already restarted)"));
        assert!(report.contains("- [policy] course-v1:GS+ETH201+2026: course"));
    }
}
