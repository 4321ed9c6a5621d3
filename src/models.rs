use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub learner_name: String,
    pub learner_email: String,
    pub language: Option<String>,
    pub course_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// A completion can never precede the enrollment it completes.
    pub fn is_consistent(&self) -> bool {
        self.completed_at
            .map_or(true, |completed_at| completed_at >= self.created_at)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReEnrollUnit {
    #[default]
    Month,
    Year,
}

impl ReEnrollUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReEnrollUnit::Month => "month",
            ReEnrollUnit::Year => "year",
        }
    }
}

impl fmt::Display for ReEnrollUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReEnrollUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "month" | "months" => Ok(ReEnrollUnit::Month),
            "year" | "years" => Ok(ReEnrollUnit::Year),
            other => Err(format!("unknown re-enroll unit '{other}'")),
        }
    }
}

/// Timing rules configured on a course by its authors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoursePolicy {
    pub finish_days: Option<i64>,
    pub reminder_days: BTreeSet<i64>,
    pub periodic_reminder_enabled: bool,
    pub periodic_reminder_interval_days: i64,
    pub re_enroll_interval: Option<i64>,
    pub re_enroll_unit: ReEnrollUnit,
}

impl CoursePolicy {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(days) = self.finish_days {
            if days < 0 {
                return Err(format!("finish_days must not be negative, got {days}"));
            }
        }
        if let Some(day) = self.reminder_days.iter().find(|day| **day < 0) {
            return Err(format!("reminder day {day} is negative"));
        }
        if self.periodic_reminder_enabled && self.periodic_reminder_interval_days <= 0 {
            return Err(format!(
                "periodic reminders enabled with interval {} days",
                self.periodic_reminder_interval_days
            ));
        }
        if let Some(interval) = self.re_enroll_interval {
            if interval <= 0 {
                return Err(format!("re_enroll_interval must be positive, got {interval}"));
            }
        }
        Ok(())
    }

    pub fn has_reminder_policy(&self) -> bool {
        self.finish_days.is_some()
            || !self.reminder_days.is_empty()
            || self.periodic_reminder_enabled
    }
}

#[derive(Debug, Clone)]
pub struct Course {
    pub id: String,
    pub display_name: String,
    pub end: Option<DateTime<Utc>>,
    pub policy: CoursePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    Reminder { overdue: bool, days_delta: i64 },
    ReEnrollment { elapsed: i64 },
}

/// One email the scheduler wants delivered. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub enrollment_id: Uuid,
    pub recipient_email: String,
    pub recipient_name: String,
    pub course_id: String,
    pub course_name: String,
    pub finish_days: Option<i64>,
    pub re_enroll_interval: Option<i64>,
    pub re_enroll_unit: ReEnrollUnit,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CourseStatus {
    pub course_id: String,
    pub course_name: String,
    pub active: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub overdue: usize,
    pub reminders_due: usize,
    pub re_enrollments_due: usize,
}

#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub learner_name: String,
    pub learner_email: String,
    pub course_id: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn parses_units_case_insensitively() {
        assert_eq!("Month".parse::<ReEnrollUnit>(), Ok(ReEnrollUnit::Month));
        assert_eq!(" years ".parse::<ReEnrollUnit>(), Ok(ReEnrollUnit::Year));
        assert!("week".parse::<ReEnrollUnit>().is_err());
    }

    #[test]
    fn periodic_policy_requires_positive_interval() {
        let policy = CoursePolicy {
            periodic_reminder_enabled: true,
            periodic_reminder_interval_days: 0,
            ..CoursePolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = CoursePolicy {
            periodic_reminder_interval_days: 7,
            ..policy
        };
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn rejects_negative_reminder_days() {
        let policy = CoursePolicy {
            reminder_days: BTreeSet::from([-1, 10]),
            ..CoursePolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.contains("-1"), "got: {err}");
    }

    #[test]
    fn empty_policy_has_nothing_to_remind() {
        assert!(!CoursePolicy::default().has_reminder_policy());
        let policy = CoursePolicy {
            reminder_days: BTreeSet::from([3]),
            ..CoursePolicy::default()
        };
        assert!(policy.has_reminder_policy());
    }

    #[test]
    fn completion_before_enrollment_is_inconsistent() {
        let created_at = Utc::now();
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            learner_id: Uuid::new_v4(),
            learner_name: "Avery Lee".to_string(),
            learner_email: "avery@example.com".to_string(),
            language: None,
            course_id: "course-v1:GS+SAFE101+2026".to_string(),
            is_active: true,
            created_at,
            completed_at: Some(created_at - Duration::days(1)),
        };
        assert!(enrollment.is_completed());
        assert!(!enrollment.is_consistent());
    }
}
