use chrono::{DateTime, Datelike, Months, Utc};

use crate::models::{Course, CoursePolicy, ReEnrollUnit};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderDue {
    pub overdue: bool,
    pub days_delta: i64,
}

/// Courses with something to remind about that have not ended yet.
pub fn is_course_eligible(course: &Course, now: DateTime<Utc>) -> bool {
    course.policy.has_reminder_policy() && course.end.map_or(true, |end| end > now)
}

/// Whole days between `since` and `now`, rounded down.
pub fn elapsed_days(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Calendar months between two instants. A month counts once the same
/// day-of-month is reached, clamped to the end of shorter months
/// (Jan 31 -> Feb 28 is one month).
pub fn whole_months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    if to <= from {
        return 0;
    }

    let mut months = i64::from(to.year() - from.year()) * 12
        + i64::from(to.month()) - i64::from(from.month());

    while months > 0 {
        let reached = u32::try_from(months)
            .ok()
            .and_then(|m| from.checked_add_months(Months::new(m)))
            .is_some_and(|anniversary| anniversary <= to);
        if reached {
            break;
        }
        months -= 1;
    }

    months.max(0)
}

pub fn elapsed_in_unit(from: DateTime<Utc>, to: DateTime<Utc>, unit: ReEnrollUnit) -> i64 {
    let months = whole_months_between(from, to);
    match unit {
        ReEnrollUnit::Month => months,
        ReEnrollUnit::Year => months / 12,
    }
}

/// Decides whether an unfinished enrollment gets a reminder today.
///
/// Periodic reminders win over fixed reminder days when both are set.
pub fn reminder_due(policy: &CoursePolicy, elapsed_days: i64) -> Option<ReminderDue> {
    let finish_days = policy.finish_days?;

    let send = if policy.periodic_reminder_enabled && policy.periodic_reminder_interval_days > 0 {
        elapsed_days > 0 && elapsed_days % policy.periodic_reminder_interval_days == 0
    } else {
        policy.reminder_days.contains(&elapsed_days)
    };

    if !send {
        return None;
    }

    let due = if elapsed_days > finish_days {
        ReminderDue {
            overdue: true,
            days_delta: elapsed_days - finish_days,
        }
    } else {
        ReminderDue {
            overdue: false,
            days_delta: finish_days - elapsed_days,
        }
    };
    Some(due)
}

/// Returns the elapsed interval when a completion is old enough to re-enroll.
pub fn re_enrollment_due(
    policy: &CoursePolicy,
    completed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<i64> {
    let interval = policy.re_enroll_interval?;
    let elapsed = elapsed_in_unit(completed_at, now, policy.re_enroll_unit);
    (elapsed >= interval).then_some(elapsed)
}

/// True when an unfinished enrollment is past its finish deadline.
pub fn is_overdue(policy: &CoursePolicy, elapsed_days: i64) -> bool {
    policy
        .finish_days
        .is_some_and(|finish_days| elapsed_days > finish_days)
}
