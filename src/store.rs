//! Repository seams the scheduler depends on.
//!
//! `CourseCatalog` is the read-only policy lookup owned by course authoring.
//! `EnrollmentStore` reads active enrollments and applies re-enrollment.
//! Postgres implementations live in `db`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Course, Enrollment};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("course {0} not found")]
    CourseNotFound(String),

    #[error("course {course_id} has an invalid policy: {reason}")]
    InvalidPolicy { course_id: String, reason: String },
}

#[async_trait::async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn course_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Fails with `CourseNotFound` or `InvalidPolicy` when the course
    /// cannot be evaluated.
    async fn course(&self, course_id: &str) -> Result<Course, StoreError>;
}

#[async_trait::async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Active enrollments in the given courses, either completed
    /// (`completed_at` set) or still in progress.
    async fn active_enrollments(
        &self,
        course_ids: &[String],
        completed: bool,
    ) -> Result<Vec<Enrollment>, StoreError>;

    /// Atomically restarts an enrollment at `now`: clears its completion and
    /// deletes the learner's graded-problem progress in that course.
    /// Returns the number of progress records removed, or `None` when the
    /// enrollment is no longer an active completion and nothing was changed.
    async fn re_enroll(
        &self,
        enrollment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct ProgressRecord {
        pub learner_id: Uuid,
        pub course_id: String,
        pub problem_key: String,
    }

    /// Map-backed catalog and enrollment store.
    #[derive(Default)]
    pub struct MemoryStore {
        pub courses: Mutex<Vec<Course>>,
        pub broken_courses: Mutex<HashSet<String>>,
        pub enrollments: Mutex<HashMap<Uuid, Enrollment>>,
        pub progress: Mutex<Vec<ProgressRecord>>,
        pub failing_re_enrollments: Mutex<HashSet<Uuid>>,
    }

    impl MemoryStore {
        pub fn add_course(&self, course: Course) {
            self.courses.lock().unwrap().push(course);
        }

        pub fn add_broken_course(&self, course_id: &str) {
            self.broken_courses
                .lock()
                .unwrap()
                .insert(course_id.to_string());
        }

        pub fn add_enrollment(&self, enrollment: Enrollment) {
            self.enrollments
                .lock()
                .unwrap()
                .insert(enrollment.id, enrollment);
        }

        pub fn add_progress(&self, learner_id: Uuid, course_id: &str, problem_key: &str) {
            self.progress.lock().unwrap().push(ProgressRecord {
                learner_id,
                course_id: course_id.to_string(),
                problem_key: problem_key.to_string(),
            });
        }

        pub fn fail_re_enroll(&self, enrollment_id: Uuid) {
            self.failing_re_enrollments
                .lock()
                .unwrap()
                .insert(enrollment_id);
        }

        pub fn enrollment(&self, id: Uuid) -> Enrollment {
            self.enrollments.lock().unwrap()[&id].clone()
        }

        pub fn progress_count(&self, learner_id: Uuid, course_id: &str) -> usize {
            self.progress
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.learner_id == learner_id && p.course_id == course_id)
                .count()
        }
    }

    #[async_trait::async_trait]
    impl CourseCatalog for MemoryStore {
        async fn course_ids(&self) -> Result<Vec<String>, StoreError> {
            let mut ids: Vec<String> = self
                .courses
                .lock()
                .unwrap()
                .iter()
                .map(|course| course.id.clone())
                .collect();
            ids.extend(self.broken_courses.lock().unwrap().iter().cloned());
            Ok(ids)
        }

        async fn course(&self, course_id: &str) -> Result<Course, StoreError> {
            if self.broken_courses.lock().unwrap().contains(course_id) {
                return Err(StoreError::InvalidPolicy {
                    course_id: course_id.to_string(),
                    reason: "reminder_days is not a list".to_string(),
                });
            }
            let course = self
                .courses
                .lock()
                .unwrap()
                .iter()
                .find(|course| course.id == course_id)
                .cloned()
                .ok_or_else(|| StoreError::CourseNotFound(course_id.to_string()))?;
            course
                .policy
                .validate()
                .map_err(|reason| StoreError::InvalidPolicy {
                    course_id: course_id.to_string(),
                    reason,
                })?;
            Ok(course)
        }
    }

    #[async_trait::async_trait]
    impl EnrollmentStore for MemoryStore {
        async fn active_enrollments(
            &self,
            course_ids: &[String],
            completed: bool,
        ) -> Result<Vec<Enrollment>, StoreError> {
            let mut matching: Vec<Enrollment> = self
                .enrollments
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.is_active && e.is_completed() == completed)
                .filter(|e| course_ids.contains(&e.course_id))
                .cloned()
                .collect();
            matching.sort_by_key(|e| e.created_at);
            Ok(matching)
        }

        async fn re_enroll(
            &self,
            enrollment_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Option<u64>, StoreError> {
            if self
                .failing_re_enrollments
                .lock()
                .unwrap()
                .contains(&enrollment_id)
            {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }

            let mut enrollments = self.enrollments.lock().unwrap();
            let Some(enrollment) = enrollments
                .get_mut(&enrollment_id)
                .filter(|e| e.is_active && e.is_completed())
            else {
                return Ok(None);
            };
            enrollment.created_at = now;
            enrollment.completed_at = None;

            let mut progress = self.progress.lock().unwrap();
            let before = progress.len();
            progress.retain(|p| {
                !(p.learner_id == enrollment.learner_id && p.course_id == enrollment.course_id)
            });
            Ok(Some((before - progress.len()) as u64))
        }
    }
}
