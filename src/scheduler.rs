//! Daily enrollment lifecycle pass.
//!
//! Completed enrollments whose completion has aged past the course's
//! re-enrollment interval are restarted; unfinished enrollments get reminder
//! emails on the days their course asks for. Every enrollment is handled
//! independently: a failure is logged, recorded in the [`RunSummary`] and the
//! pass moves on to the next one.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Course, Enrollment, NotificationEvent, NotificationKind};
use crate::notify::{Notifier, NotifyError};
use crate::policy;
use crate::store::{CourseCatalog, EnrollmentStore, StoreError};
use crate::templating::TemplateRenderer;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    PolicyLookup,
    Persistence,
    Dispatch,
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub course_id: String,
    pub enrollment_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub courses_eligible: usize,
    pub courses_skipped: usize,
    pub re_enrollments: usize,
    /// Due in the snapshot but already restarted when the write ran.
    pub re_enrollments_stale: usize,
    pub progress_deleted: u64,
    pub reminders_due: usize,
    pub notifications_sent: usize,
    /// Every notification handed to the notifier, delivered or not.
    pub emitted: Vec<NotificationEvent>,
    pub failures: Vec<ItemFailure>,
}

impl RunSummary {
    fn merge(&mut self, other: RunSummary) {
        self.courses_eligible += other.courses_eligible;
        self.courses_skipped += other.courses_skipped;
        self.re_enrollments += other.re_enrollments;
        self.re_enrollments_stale += other.re_enrollments_stale;
        self.progress_deleted += other.progress_deleted;
        self.reminders_due += other.reminders_due;
        self.notifications_sent += other.notifications_sent;
        self.emitted.extend(other.emitted);
        self.failures.extend(other.failures);
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }
}

/// Courses the pass will look at, keyed by course id.
#[derive(Debug, Default)]
pub struct Eligibility {
    pub courses: BTreeMap<String, Course>,
    pub failures: Vec<ItemFailure>,
}

impl Eligibility {
    pub fn course_ids(&self) -> Vec<String> {
        self.courses.keys().cloned().collect()
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            courses_eligible: self.courses.len(),
            courses_skipped: self.failures.len(),
            failures: self.failures.clone(),
            ..RunSummary::default()
        }
    }
}

/// Loads every course and keeps the ones with a reminder policy that have
/// not ended. Courses whose policy cannot be loaded are logged and skipped.
pub async fn eligible_courses(
    catalog: &dyn CourseCatalog,
    now: DateTime<Utc>,
) -> Result<Eligibility, StoreError> {
    let mut eligibility = Eligibility::default();

    for course_id in catalog.course_ids().await? {
        match catalog.course(&course_id).await {
            Ok(course) if policy::is_course_eligible(&course, now) => {
                eligibility.courses.insert(course.id.clone(), course);
            }
            Ok(_) => debug!(course_id = %course_id, "course has no active reminder policy"),
            Err(e) => {
                warn!(course_id = %course_id, error = %e, "skipping course with unusable policy");
                eligibility.failures.push(ItemFailure {
                    kind: FailureKind::PolicyLookup,
                    course_id,
                    enrollment_id: None,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(eligibility)
}

pub struct EnrollmentLifecycleScheduler<'a> {
    catalog: &'a dyn CourseCatalog,
    enrollments: &'a dyn EnrollmentStore,
    notifier: &'a dyn Notifier,
    renderer: TemplateRenderer,
    send_timeout: Duration,
}

impl<'a> EnrollmentLifecycleScheduler<'a> {
    pub fn new(
        catalog: &'a dyn CourseCatalog,
        enrollments: &'a dyn EnrollmentStore,
        notifier: &'a dyn Notifier,
        renderer: TemplateRenderer,
    ) -> Self {
        Self {
            catalog,
            enrollments,
            notifier,
            renderer,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub async fn select_eligible_courses(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Eligibility, StoreError> {
        eligible_courses(self.catalog, now).await
    }

    pub async fn process_re_enrollments(
        &self,
        eligible: &Eligibility,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, StoreError> {
        let completed = self.load_active(eligible, true).await?;
        Ok(self.re_enroll_all(eligible, completed, now).await)
    }

    /// Sends today's reminders. Calling this twice for the same `now` sends
    /// them twice; deduplication is left to the caller.
    pub async fn process_reminders(
        &self,
        eligible: &Eligibility,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, StoreError> {
        let incomplete = self.load_active(eligible, false).await?;
        Ok(self.remind_all(eligible, incomplete, now).await)
    }

    /// One full pass. Both enrollment sets are read before anything is
    /// mutated, so an enrollment restarted here is not reminded until the
    /// next pass.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary, StoreError> {
        let eligible = self.select_eligible_courses(now).await?;
        let completed = self.load_active(&eligible, true).await?;
        let incomplete = self.load_active(&eligible, false).await?;

        let mut summary = eligible.summary();
        summary.merge(self.re_enroll_all(&eligible, completed, now).await);
        summary.merge(self.remind_all(&eligible, incomplete, now).await);

        info!(
            %now,
            courses = summary.courses_eligible,
            courses_skipped = summary.courses_skipped,
            re_enrollments = summary.re_enrollments,
            re_enrollments_stale = summary.re_enrollments_stale,
            reminders = summary.reminders_due,
            sent = summary.notifications_sent,
            failures = summary.failures.len(),
            "lifecycle pass finished"
        );

        Ok(summary)
    }

    async fn load_active(
        &self,
        eligible: &Eligibility,
        completed: bool,
    ) -> Result<Vec<Enrollment>, StoreError> {
        if eligible.courses.is_empty() {
            return Ok(Vec::new());
        }
        self.enrollments
            .active_enrollments(&eligible.course_ids(), completed)
            .await
    }

    async fn re_enroll_all(
        &self,
        eligible: &Eligibility,
        completed: Vec<Enrollment>,
        now: DateTime<Utc>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for enrollment in completed {
            let Some(course) = eligible.courses.get(&enrollment.course_id) else {
                continue;
            };
            let Some(completed_at) = enrollment.completed_at else {
                continue;
            };
            if !enrollment.is_consistent() {
                warn!(
                    enrollment_id = %enrollment.id,
                    course_id = %course.id,
                    "completion predates enrollment, skipping"
                );
                summary.failures.push(ItemFailure {
                    kind: FailureKind::Persistence,
                    course_id: course.id.clone(),
                    enrollment_id: Some(enrollment.id),
                    message: format!(
                        "completed at {completed_at} before enrolling at {}",
                        enrollment.created_at
                    ),
                });
                continue;
            }
            let Some(elapsed) = policy::re_enrollment_due(&course.policy, completed_at, now) else {
                continue;
            };

            match self.enrollments.re_enroll(enrollment.id, now).await {
                Ok(None) => {
                    debug!(
                        enrollment_id = %enrollment.id,
                        course_id = %course.id,
                        "enrollment already restarted, skipping"
                    );
                    summary.re_enrollments_stale += 1;
                    continue;
                }
                Ok(Some(deleted)) => {
                    info!(
                        enrollment_id = %enrollment.id,
                        course_id = %course.id,
                        elapsed,
                        unit = %course.policy.re_enroll_unit,
                        progress_deleted = deleted,
                        "re-enrolled learner"
                    );
                    summary.re_enrollments += 1;
                    summary.progress_deleted += deleted;
                }
                Err(e) => {
                    warn!(
                        enrollment_id = %enrollment.id,
                        course_id = %course.id,
                        error = %e,
                        "re-enrollment failed, no notification sent"
                    );
                    summary.failures.push(ItemFailure {
                        kind: FailureKind::Persistence,
                        course_id: course.id.clone(),
                        enrollment_id: Some(enrollment.id),
                        message: e.to_string(),
                    });
                    continue;
                }
            }

            let event = notification_event(
                &enrollment,
                course,
                NotificationKind::ReEnrollment { elapsed },
            );
            self.dispatch(event, &mut summary).await;
        }

        summary
    }

    async fn remind_all(
        &self,
        eligible: &Eligibility,
        incomplete: Vec<Enrollment>,
        now: DateTime<Utc>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for enrollment in incomplete {
            let Some(course) = eligible.courses.get(&enrollment.course_id) else {
                continue;
            };
            let elapsed = policy::elapsed_days(enrollment.created_at, now);
            let Some(due) = policy::reminder_due(&course.policy, elapsed) else {
                continue;
            };

            debug!(
                enrollment_id = %enrollment.id,
                course_id = %course.id,
                elapsed_days = elapsed,
                overdue = due.overdue,
                "reminder due"
            );
            summary.reminders_due += 1;

            let event = notification_event(
                &enrollment,
                course,
                NotificationKind::Reminder {
                    overdue: due.overdue,
                    days_delta: due.days_delta,
                },
            );
            self.dispatch(event, &mut summary).await;
        }

        summary
    }

    async fn dispatch(&self, event: NotificationEvent, summary: &mut RunSummary) {
        match self.deliver(&event).await {
            Ok(()) => summary.notifications_sent += 1,
            Err(e) => {
                warn!(
                    enrollment_id = %event.enrollment_id,
                    course_id = %event.course_id,
                    channel = self.notifier.channel_name(),
                    error = %e,
                    "notification not delivered"
                );
                summary.failures.push(ItemFailure {
                    kind: FailureKind::Dispatch,
                    course_id: event.course_id.clone(),
                    enrollment_id: Some(event.enrollment_id),
                    message: e.to_string(),
                });
            }
        }
        summary.emitted.push(event);
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let email = self.renderer.render(event)?;
        tokio::time::timeout(self.send_timeout, self.notifier.send(&email))
            .await
            .map_err(|_| NotifyError::Timeout(self.send_timeout))?
    }
}

fn notification_event(
    enrollment: &Enrollment,
    course: &Course,
    kind: NotificationKind,
) -> NotificationEvent {
    NotificationEvent {
        kind,
        enrollment_id: enrollment.id,
        recipient_email: enrollment.learner_email.clone(),
        recipient_name: enrollment.learner_name.clone(),
        course_id: course.id.clone(),
        course_name: course.display_name.clone(),
        finish_days: course.policy.finish_days,
        re_enroll_interval: course.policy.re_enroll_interval,
        re_enroll_unit: course.policy.re_enroll_unit,
        language: enrollment.language.clone(),
    }
}
